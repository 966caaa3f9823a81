//! NetworkManager backend driving the `nmcli` CLI.

use std::collections::HashMap;
use std::process::Output;
use std::time::Duration;

use tracing::{debug, info, warn};

use hvacvibe_protocol::{NetworkDescriptor, WifiStatus};

use crate::network::{NetworkError, NetworkFuture, NetworkManager};

/// Longest failure message passed back to viewers, in characters.
const MAX_MESSAGE_CHARS: usize = 80;

/// `nmcli`-backed [`NetworkManager`].
#[derive(Debug, Clone)]
pub struct Nmcli {
    /// Timeout for scan and status invocations.
    pub command_timeout: Duration,
    /// Timeout for `nmcli dev wifi connect`.
    pub connect_timeout: Duration,
    /// Wait between triggering a rescan and listing results.
    pub rescan_settle: Duration,
}

impl Default for Nmcli {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            rescan_settle: Duration::from_secs(2),
        }
    }
}

impl Nmcli {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output, NetworkError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, output).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => Err(NetworkError::Unavailable(format!("{program}: {e}"))),
            Err(_) => Err(NetworkError::Timeout),
        }
    }

    async fn ip_address(&self) -> String {
        match self.run("hostname", &["-I"], self.command_timeout).await {
            Ok(out) => first_address(&String::from_utf8_lossy(&out.stdout)),
            Err(e) => {
                debug!("hostname -I failed: {e}");
                String::new()
            }
        }
    }
}

impl NetworkManager for Nmcli {
    fn scan(&self) -> NetworkFuture<'_, Result<Vec<NetworkDescriptor>, NetworkError>> {
        Box::pin(async move {
            if let Err(e) = self.run("nmcli", &["dev", "wifi", "rescan"], self.command_timeout).await {
                debug!("wifi rescan failed: {e}");
            }
            tokio::time::sleep(self.rescan_settle).await;

            let out = self
                .run(
                    "nmcli",
                    &["-t", "-f", "SSID,SIGNAL,SECURITY", "dev", "wifi", "list"],
                    self.command_timeout,
                )
                .await?;
            let networks = parse_wifi_list(&String::from_utf8_lossy(&out.stdout));
            info!(count = networks.len(), "wifi scan complete");
            Ok(networks)
        })
    }

    fn connect<'a>(
        &'a self,
        ssid: &'a str,
        password: &'a str,
    ) -> NetworkFuture<'a, Result<String, NetworkError>> {
        Box::pin(async move {
            info!(%ssid, "joining wifi network");
            let out = self
                .run(
                    "nmcli",
                    &["dev", "wifi", "connect", ssid, "password", password],
                    self.connect_timeout,
                )
                .await?;
            let result = connect_outcome(
                ssid,
                &String::from_utf8_lossy(&out.stdout),
                &String::from_utf8_lossy(&out.stderr),
            );
            if let Err(e) = &result {
                warn!(%ssid, "wifi connect failed: {e}");
            }
            result
        })
    }

    fn status(&self) -> NetworkFuture<'_, WifiStatus> {
        Box::pin(async move {
            let out = match self
                .run("nmcli", &["-t", "-f", "ACTIVE,SSID,SIGNAL", "dev", "wifi"], self.command_timeout)
                .await
            {
                Ok(out) => out,
                Err(e) => {
                    debug!("wifi status failed: {e}");
                    return WifiStatus::default();
                }
            };

            match parse_active(&String::from_utf8_lossy(&out.stdout)) {
                Some((ssid, signal)) => WifiStatus {
                    connected: true,
                    ssid,
                    ip: self.ip_address().await,
                    signal,
                },
                None => WifiStatus::default(),
            }
        })
    }
}

/// Splits one line of `nmcli -t` output, honouring `\:` and `\\` escapes.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parses `nmcli -t -f SSID,SIGNAL,SECURITY dev wifi list`.
///
/// Hidden networks are skipped. Duplicate SSIDs keep the strongest signal.
/// Sorted strongest first.
pub fn parse_wifi_list(stdout: &str) -> Vec<NetworkDescriptor> {
    let mut best: HashMap<String, NetworkDescriptor> = HashMap::new();
    for line in stdout.lines() {
        let fields = split_terse(line);
        if fields.len() < 3 || fields[0].is_empty() {
            continue;
        }
        let signal = fields[1].trim().parse::<u8>().unwrap_or(0).min(100);
        let net = NetworkDescriptor {
            ssid: fields[0].clone(),
            signal,
            secured: fields[2].trim() != "--",
        };
        match best.get(&net.ssid) {
            Some(existing) if existing.signal >= net.signal => {}
            _ => {
                best.insert(net.ssid.clone(), net);
            }
        }
    }

    let mut networks: Vec<NetworkDescriptor> = best.into_values().collect();
    networks.sort_by(|a, b| b.signal.cmp(&a.signal).then_with(|| a.ssid.cmp(&b.ssid)));
    networks
}

/// Finds the active network in `nmcli -t -f ACTIVE,SSID,SIGNAL dev wifi`.
pub fn parse_active(stdout: &str) -> Option<(String, u8)> {
    stdout.lines().find(|l| l.starts_with("yes:")).map(|line| {
        let fields = split_terse(line);
        let ssid = fields.get(1).cloned().unwrap_or_default();
        let signal = fields
            .get(2)
            .and_then(|s| s.trim().parse::<u8>().ok())
            .unwrap_or(0);
        (ssid, signal)
    })
}

/// First address printed by `hostname -I`, or empty.
pub fn first_address(stdout: &str) -> String {
    stdout.split_whitespace().next().unwrap_or_default().to_string()
}

/// Interprets the output of `nmcli dev wifi connect`.
pub fn connect_outcome(ssid: &str, stdout: &str, stderr: &str) -> Result<String, NetworkError> {
    if stdout.to_lowercase().contains("successfully activated") {
        return Ok(format!("Connected to {ssid}"));
    }
    let detail = match stderr.trim() {
        "" => stdout.trim(),
        err => err,
    };
    let message = if detail.is_empty() {
        format!("Could not connect to {ssid}")
    } else {
        detail.chars().take(MAX_MESSAGE_CHARS).collect()
    };
    Err(NetworkError::Failed(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_list_dedups_and_sorts() {
        let out = "\
Home:72:WPA2
:90:WPA2
Cafe:40:--
Home:81:WPA2
Office\\:5G:65:WPA2 WPA3
Broken:abc:WPA2
";
        let nets = parse_wifi_list(out);
        let names: Vec<&str> = nets.iter().map(|n| n.ssid.as_str()).collect();
        assert_eq!(names, vec!["Home", "Office:5G", "Cafe", "Broken"]);
        assert_eq!(nets[0].signal, 81);
        assert!(nets[0].secured);
        assert!(!nets[2].secured);
        assert_eq!(nets[3].signal, 0);
    }

    #[test]
    fn wifi_list_ignores_short_lines() {
        assert!(parse_wifi_list("Home:50\n\n").is_empty());
    }

    #[test]
    fn active_network_is_found() {
        let out = "no:Cafe:40\nyes:Home:67\n";
        assert_eq!(parse_active(out), Some(("Home".to_string(), 67)));
        assert_eq!(parse_active("no:Cafe:40\n"), None);
    }

    #[test]
    fn first_address_of_hostname() {
        assert_eq!(first_address("192.168.1.20 fe80::1 \n"), "192.168.1.20");
        assert_eq!(first_address("\n"), "");
    }

    #[test]
    fn connect_success_message() {
        let out = "Device 'wlan0' successfully activated with 'abc'.";
        assert_eq!(connect_outcome("Home", out, "").unwrap(), "Connected to Home");
    }

    #[test]
    fn connect_failure_uses_stderr_truncated() {
        let err = format!("Error: Connection activation failed: {}", "x".repeat(100));
        let Err(NetworkError::Failed(msg)) = connect_outcome("Home", "", &err) else {
            panic!("expected failure");
        };
        assert_eq!(msg.chars().count(), MAX_MESSAGE_CHARS);
        assert!(msg.starts_with("Error: Connection activation failed"));
    }

    #[test]
    fn connect_failure_falls_back_to_stdout() {
        let Err(NetworkError::Failed(msg)) = connect_outcome("Home", "  Secrets were required  ", "")
        else {
            panic!("expected failure");
        };
        assert_eq!(msg, "Secrets were required");
    }

    #[test]
    fn timeout_message() {
        assert_eq!(NetworkError::Timeout.to_string(), "Connection timed out");
    }
}
