use std::collections::{BTreeMap, HashMap};

use bollard::models::{PortBinding, PortMap};

/// Translates `{host_port: [container_ports]}` into the engine's port map.
///
/// Every `(host, container)` pair becomes a `container/tcp` entry bound to
/// `host` on all interfaces. A container port listed under several host ports
/// gets one binding per host port. Port values are not range-checked here;
/// the engine rejects bad ones.
pub fn translate_port_bindings(ports: &BTreeMap<i64, Vec<i64>>) -> PortMap {
    let mut port_map: PortMap = HashMap::new();

    for (host_port, container_ports) in ports {
        for container_port in container_ports {
            let bindings = port_map
                .entry(format!("{container_port}/tcp"))
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new);
            let host_port = host_port.to_string();
            if !bindings.iter().any(|b| b.host_port.as_deref() == Some(host_port.as_str())) {
                bindings.push(PortBinding {
                    host_ip: Some(String::new()),
                    host_port: Some(host_port),
                });
            }
        }
    }

    port_map
}
