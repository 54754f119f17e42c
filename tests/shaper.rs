//! Install/remove round trips against a simulated tc/iptables.
//!
//! `FakeKernel` keeps the classes, filters and mark rules created through
//! the executor and renders `tc filter show` the way iproute2 does, so the
//! parser sees realistic output for whatever was installed.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Mutex;

use vpn_throttle::cmd_abstraction::{CommandExecutor, CommandOutput};
use vpn_throttle::shaper::{ClassId, Protocol, Shaper, ShaperSettings};
use vpn_throttle::ThrottleError;

#[derive(Debug, Clone)]
struct U32Filter {
    protocol: String,
    dst: IpAddr,
    dport: Option<u16>,
    flowid: String,
}

#[derive(Default)]
struct State {
    log: Vec<String>,
    classes: BTreeMap<String, String>,
    u32_filters: BTreeMap<String, U32Filter>,
    fw_filters: BTreeMap<String, String>,
    marks: Vec<(String, String)>,
}

#[derive(Default)]
struct FakeKernel {
    state: Mutex<State>,
}

impl FakeKernel {
    fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn is_empty(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.classes.is_empty() && s.u32_filters.is_empty() && s.fw_filters.is_empty() && s.marks.is_empty()
    }

    fn fail(stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
            code: Some(2),
        }
    }

    fn render(prio: &str, f: &U32Filter) -> String {
        let mut out = format!(
            "filter parent 1: protocol {p} pref {prio} u32 chain 0\n\
             filter parent 1: protocol {p} pref {prio} u32 chain 0 fh 800: ht divisor 1\n\
             filter parent 1: protocol {p} pref {prio} u32 chain 0 fh 800::800 order 2048 key ht 800 bkt 0 flowid {flow} not_in_hw\n",
            p = f.protocol,
            prio = prio,
            flow = f.flowid
        );
        let (bytes, base) = match f.dst {
            IpAddr::V4(v4) => (v4.octets().to_vec(), 16),
            IpAddr::V6(v6) => (v6.octets().to_vec(), 24),
        };
        for (i, chunk) in bytes.chunks(4).enumerate() {
            let key: String = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            out.push_str(&format!("  match {}/ffffffff at {}\n", key, base + 4 * i));
        }
        if let Some(port) = f.dport {
            out.push_str(&format!("  match {:08x}/0000ffff at 20\n", port));
        }
        out
    }

    fn tc(&self, s: &mut State, args: &[String]) -> CommandOutput {
        let a: Vec<&str> = args.iter().map(String::as_str).collect();
        let arg_after = |key: &str| a.iter().position(|x| *x == key).map(|i| a[i + 1].to_string());

        match (a[0], a[1]) {
            ("class", "add") => {
                let id = arg_after("classid").unwrap();
                if s.classes.contains_key(&id) {
                    return Self::fail("RTNETLINK answers: File exists");
                }
                s.classes.insert(id, arg_after("rate").unwrap());
            }
            ("class", "del") => {
                let id = arg_after("classid").unwrap();
                if s.fw_filters.values().chain(s.u32_filters.values().map(|f| &f.flowid)).any(|f| *f == id) {
                    return Self::fail("Error: Filter exists.");
                }
                if s.classes.remove(&id).is_none() {
                    return Self::fail("RTNETLINK answers: No such file or directory");
                }
            }
            ("filter", "add") => {
                let prio = arg_after("prio").unwrap();
                let flowid = arg_after("flowid").unwrap();
                if a.contains(&"fw") {
                    s.fw_filters.insert(prio, flowid);
                } else {
                    let dst = arg_after("dst").unwrap();
                    let dst: IpAddr = dst.split('/').next().unwrap().parse().unwrap();
                    let dport = arg_after("dport").map(|p| p.parse().unwrap());
                    s.u32_filters.insert(
                        prio,
                        U32Filter {
                            protocol: arg_after("protocol").unwrap(),
                            dst,
                            dport,
                            flowid,
                        },
                    );
                }
            }
            ("filter", "del") => {
                let prio = arg_after("prio").unwrap();
                let removed = s.u32_filters.remove(&prio).is_some() || s.fw_filters.remove(&prio).is_some();
                if !removed {
                    return Self::fail("Error: Filter with specified priority/protocol not found.");
                }
            }
            ("filter", "show") => {
                let prio = arg_after("prio").unwrap();
                let out = s
                    .u32_filters
                    .get(&prio)
                    .map(|f| Self::render(&prio, f))
                    .unwrap_or_default();
                return CommandOutput::ok(out);
            }
            ("qdisc", "show") => return CommandOutput::ok("qdisc htb 1: root refcnt 2 r2q 10 default 0x1\n"),
            other => panic!("unexpected tc command {:?}", other),
        }
        CommandOutput::ok("")
    }
}

#[async_trait]
impl CommandExecutor for FakeKernel {
    async fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let mut s = self.state.lock().unwrap();
        s.log.push(format!("{} {}", cmd, args.join(" ")));
        let out = match cmd {
            "tc" => self.tc(&mut s, args),
            "iptables" | "ip6tables" => {
                let rule = (args[3].clone(), args[7].clone());
                match args[0].as_str() {
                    "-A" => {
                        s.marks.push(rule);
                        CommandOutput::ok("")
                    }
                    "-D" => match s.marks.iter().position(|m| *m == rule) {
                        Some(i) => {
                            s.marks.remove(i);
                            CommandOutput::ok("")
                        }
                        None => Self::fail("iptables: Bad rule (does a matching rule exist in that chain?)."),
                    },
                    other => panic!("unexpected iptables op {}", other),
                }
            }
            other => panic!("unexpected command {}", other),
        };
        Ok(out)
    }
}

fn shaper(throttle_upstream: bool) -> Shaper<FakeKernel> {
    Shaper::new(
        FakeKernel::default(),
        ShaperSettings {
            device: "eth0".to_string(),
            max_bandwidth: "1gbit".to_string(),
            throttle_upstream,
        },
    )
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_ipv4_round_trip_with_port() {
    let s = shaper(true);
    let id = s.install(ip("198.51.100.20"), Some(4500), ip("10.10.1.2"), 2048).await.unwrap();

    let rule = s.discover(id).await.unwrap().expect("rule should be installed");
    assert_eq!(rule.class_id, id);
    assert_eq!(rule.address, ip("198.51.100.20"));
    assert_eq!(rule.port, Some(4500));
    assert_eq!(rule.protocol, Protocol::Ip);

    assert!(s.remove(ip("198.51.100.20"), Some(4500), ip("10.10.1.2")).await.unwrap());
    assert!(s.executor().is_empty());
}

#[tokio::test]
async fn test_ipv6_round_trip() {
    let s = shaper(true);
    let client = ip("2600:1f18:31:dc1d:f6fd:7056:72bf:bdf2");
    let id = s.install(client, None, ip("10.2.2.2"), 555).await.unwrap();

    let rule = s.discover(id).await.unwrap().unwrap();
    assert_eq!(rule.address, client);
    assert_eq!(rule.port, None);
    assert_eq!(rule.protocol, Protocol::Ipv6);

    assert!(s.remove(client, None, ip("10.2.2.2")).await.unwrap());
    assert!(s.executor().is_empty());
}

#[tokio::test]
async fn test_remove_reverses_install() {
    let s = shaper(true);
    s.install(ip("1.2.3.5"), None, ip("10.1.2.3"), 456).await.unwrap();
    s.remove(ip("1.2.3.5"), None, ip("10.1.2.3")).await.unwrap();

    assert_eq!(
        s.executor().log(),
        vec![
            "tc class add dev eth0 parent 1: classid 1:525 htb rate 456kbit",
            "tc filter add dev eth0 protocol ip parent 1: prio 525 u32 match ip dst 1.2.3.5/32 flowid 1:525",
            "iptables -A FORWARD --src 10.1.2.3/32 -j MARK --set-mark 525",
            "tc filter add dev eth0 protocol ip parent 1: prio 10525 handle 525 fw flowid 1:525",
            "tc filter show dev eth0 prio 525",
            "tc filter del dev eth0 protocol ip prio 525",
            "tc filter del dev eth0 protocol ip prio 10525",
            "iptables -D FORWARD --src 10.1.2.3/32 -j MARK --set-mark 525",
            "tc class del dev eth0 classid 1:525",
        ]
    );
    assert!(s.executor().is_empty());
}

#[tokio::test]
async fn test_remove_twice_is_noop() {
    let s = shaper(false);
    s.install(ip("1.2.3.5"), None, ip("10.1.2.3"), 456).await.unwrap();
    assert!(s.remove(ip("1.2.3.5"), None, ip("10.1.2.3")).await.unwrap());

    let before = s.executor().log().len();
    assert!(!s.remove(ip("1.2.3.5"), None, ip("10.1.2.3")).await.unwrap());
    let log = s.executor().log();
    assert_eq!(log.len(), before + 1);
    assert_eq!(log.last().unwrap(), "tc filter show dev eth0 prio 525");
}

#[tokio::test]
async fn test_duplicate_install_fails_loudly() {
    let s = shaper(false);
    s.install(ip("1.2.3.5"), None, ip("10.1.2.3"), 456).await.unwrap();

    // 10.1.34.3 aliases onto the same class id as 10.1.2.3
    assert_eq!(
        ClassId::for_address(&ip("10.1.34.3")),
        ClassId::for_address(&ip("10.1.2.3"))
    );
    let err = s.install(ip("1.2.3.6"), None, ip("10.1.34.3"), 100).await.unwrap_err();
    match err.downcast_ref::<ThrottleError>() {
        Some(ThrottleError::Command { stderr, .. }) => assert!(stderr.contains("File exists")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_initialized_gateway_is_left_alone() {
    let s = shaper(false);
    assert!(!s.ensure_initialized().await.unwrap());
    assert_eq!(s.executor().log(), vec!["tc qdisc show dev eth0"]);
}
