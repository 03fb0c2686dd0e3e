//! Client configuration tweaks on top of the exported endpoint config

use std::path::Path;

/// Ubuntu's resolver hook; pushes the VPN DNS servers into resolv.conf.
pub const UPDATE_RESOLV_CONF: &str = "/etc/openvpn/update-resolv-conf";

/// Append script permissions, the resolver hook and the inline client
/// certificate/key to the configuration exported for the endpoint.
pub fn customize(
    exported: &str,
    client_cert: &str,
    client_key: &str,
    resolv_hook: Option<&Path>,
) -> String {
    let mut config = exported.trim_end().to_string();
    config.push_str("\n\nscript-security 2\n");

    if let Some(hook) = resolv_hook {
        config.push_str(&format!("up {}\n", hook.display()));
        config.push_str(&format!("down {}\n", hook.display()));
    }

    config.push_str(&format!("\n<cert>\n{}\n</cert>\n", client_cert.trim()));
    config.push_str(&format!("\n<key>\n{}\n</key>\n", client_key.trim()));
    config
}

/// The resolver hook, when this system ships it.
pub fn resolv_hook() -> Option<&'static Path> {
    let hook = Path::new(UPDATE_RESOLV_CONF);
    hook.is_file().then_some(hook)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORTED: &str = "client\ndev tun\nproto udp\nremote cvpn-endpoint-0123.prod.clientvpn.us-east-1.amazonaws.com 443\n<ca>\nCA\n</ca>\n\n";

    #[test]
    fn test_appends_cert_and_key() {
        let config = customize(EXPORTED, "CERT\n", "KEY", None);

        assert!(config.starts_with("client\ndev tun"));
        assert!(config.contains("</ca>\n\nscript-security 2\n"));
        assert!(config.contains("<cert>\nCERT\n</cert>"));
        assert!(config.ends_with("<key>\nKEY\n</key>\n"));
        assert!(!config.contains("update-resolv-conf"));
    }

    #[test]
    fn test_resolv_hook_lines() {
        let config = customize(
            EXPORTED,
            "CERT",
            "KEY",
            Some(Path::new(UPDATE_RESOLV_CONF)),
        );

        assert!(config.contains("up /etc/openvpn/update-resolv-conf\n"));
        assert!(config.contains("down /etc/openvpn/update-resolv-conf\n"));
        let script_security = config.find("script-security").unwrap();
        let up = config.find("up /etc").unwrap();
        assert!(script_security < up);
    }
}
