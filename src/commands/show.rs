//! Show/classid command implementations.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::shaper::ClassId;

/// Print the filter installed for a virtual IP
pub async fn run(virtual_ip: &str, config_path: &Path) -> Result<()> {
    let id = ClassId::parse_address(virtual_ip)?;
    let config = Config::resolve(config_path)?;

    let shaper = super::system_shaper(&config);
    match shaper.discover(id).await? {
        Some(rule) => {
            println!("Class:    {}", rule.class_id.handle());
            println!("Protocol: {}", rule.protocol);
            println!("Address:  {}", rule.address);
            match rule.port {
                Some(port) => println!("Port:     {}", port),
                None => println!("Port:     any"),
            }
        }
        None => println!("No filter installed for {} (prio {})", virtual_ip, id.prio()),
    }
    Ok(())
}

/// Print the class id derived from a virtual IP
pub fn run_classid(virtual_ip: &str) -> Result<()> {
    let id = ClassId::parse_address(virtual_ip)?;
    println!("{}", id);
    Ok(())
}
