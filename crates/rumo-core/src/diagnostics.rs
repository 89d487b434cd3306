//! Endpoint reachability diagnostics.
//!
//! When the initial SFTP handshake fails the host can run
//! [`diagnose_endpoint`] to find out *where* it fails: name resolution, the
//! TCP connect, or the SSH identification banner.  Each probe appends a
//! [`DiagnosticStep`]; [`finish_report`] turns the steps into a summary with
//! an optional root-cause hint.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

// ─── Shared types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

/// Result of a single diagnostic probe step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStep {
    pub name: String,
    pub status: StepStatus,
    pub message: String,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

impl DiagnosticStep {
    fn new(name: &str, status: StepStatus, message: String, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub host: String,
    pub port: u16,
    pub resolved_ip: Option<String>,
    pub steps: Vec<DiagnosticStep>,
    pub summary: String,
    pub root_cause_hint: Option<String>,
    /// Wall-clock milliseconds for the entire run.
    pub total_duration_ms: u64,
}

impl DiagnosticReport {
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.status != StepStatus::Fail)
    }
}

// ─── Probes ─────────────────────────────────────────────────────────────────

/// Resolve `host` and return the first address.  Pushes one step.
pub fn probe_dns(host: &str, port: u16, steps: &mut Vec<DiagnosticStep>) -> Option<SocketAddr> {
    let t = Instant::now();
    match (host, port).to_socket_addrs() {
        Ok(addrs) => {
            let all: Vec<SocketAddr> = addrs.collect();
            let Some(first) = all.first().copied() else {
                steps.push(
                    DiagnosticStep::new(
                        "DNS Resolution",
                        StepStatus::Fail,
                        format!("DNS returned no addresses for {host}"),
                        t,
                    )
                    .with_detail("Verify the hostname in sftp.json"),
                );
                return None;
            };
            let ips: Vec<String> = all.iter().map(|a| a.ip().to_string()).collect();
            let mut step = DiagnosticStep::new(
                "DNS Resolution",
                StepStatus::Pass,
                format!("{host} -> {}", first.ip()),
                t,
            );
            if ips.len() > 1 {
                step = step.with_detail(format!("All resolved addresses: {}", ips.join(", ")));
            }
            steps.push(step);
            Some(first)
        }
        Err(e) => {
            steps.push(
                DiagnosticStep::new(
                    "DNS Resolution",
                    StepStatus::Fail,
                    format!("DNS lookup failed: {e}"),
                    t,
                )
                .with_detail("Check hostname spelling, DNS server and network connectivity"),
            );
            None
        }
    }
}

/// Attempt a TCP connect with timeout.  Pushes one step.
pub fn probe_tcp(
    addr: SocketAddr,
    timeout: Duration,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<TcpStream> {
    let t = Instant::now();
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => {
            steps.push(DiagnosticStep::new(
                "TCP Connect",
                StepStatus::Pass,
                format!("Connected to {addr} in {}ms", t.elapsed().as_millis()),
                t,
            ));
            Some(stream)
        }
        Err(e) => {
            let detail = match e.kind() {
                std::io::ErrorKind::TimedOut => {
                    "Connection timed out; the port may be firewalled or the host unreachable"
                }
                std::io::ErrorKind::ConnectionRefused => {
                    "Connection refused; the SSH daemon may not be running or listens on another port"
                }
                _ => "Check firewall rules, VPN connectivity and that the service is running",
            };
            steps.push(
                DiagnosticStep::new(
                    "TCP Connect",
                    StepStatus::Fail,
                    format!("TCP connect failed: {e}"),
                    t,
                )
                .with_detail(detail),
            );
            None
        }
    }
}

/// Read the identification banner an SSH server sends right after connect.
pub fn probe_banner(
    stream: &TcpStream,
    timeout: Duration,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<String> {
    let _ = stream.set_read_timeout(Some(timeout));
    let t = Instant::now();
    let mut buf = [0u8; 512];
    match std::io::Read::read(&mut &*stream, &mut buf) {
        Ok(0) => {
            steps.push(DiagnosticStep::new(
                "SSH Banner",
                StepStatus::Warn,
                "Server closed the connection without sending a banner".into(),
                t,
            ));
            None
        }
        Ok(n) => {
            let banner = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            let step = if banner.starts_with("SSH-") {
                DiagnosticStep::new(
                    "SSH Banner",
                    StepStatus::Pass,
                    format!("Banner: {}", banner.chars().take(120).collect::<String>()),
                    t,
                )
            } else {
                DiagnosticStep::new(
                    "SSH Banner",
                    StepStatus::Fail,
                    "The service on this port does not speak SSH".into(),
                    t,
                )
                .with_detail(format!("Received: {}", banner.chars().take(120).collect::<String>()))
            };
            steps.push(step);
            Some(banner)
        }
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            steps.push(DiagnosticStep::new(
                "SSH Banner",
                StepStatus::Warn,
                "No banner received within timeout".into(),
                t,
            ));
            None
        }
        Err(e) => {
            steps.push(DiagnosticStep::new(
                "SSH Banner",
                StepStatus::Fail,
                format!("Banner read error: {e}"),
                t,
            ));
            None
        }
    }
}

/// Build the final report from accumulated steps.
pub fn finish_report(
    host: &str,
    port: u16,
    resolved_ip: Option<String>,
    steps: Vec<DiagnosticStep>,
    start: Instant,
) -> DiagnosticReport {
    let first_fail = steps.iter().find(|s| s.status == StepStatus::Fail);
    let any_warn = steps.iter().any(|s| s.status == StepStatus::Warn);

    let summary = if let Some(fail) = first_fail {
        format!("Diagnostics stopped at: {} ({})", fail.name, fail.message)
    } else if any_warn {
        "Endpoint reachable but warnings were reported.".into()
    } else {
        "All probes passed; the SSH endpoint is reachable.".into()
    };
    let root_cause_hint = first_fail.and_then(|s| s.detail.clone());

    DiagnosticReport {
        host: host.to_string(),
        port,
        resolved_ip,
        steps,
        summary,
        root_cause_hint,
        total_duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Run DNS → TCP → banner against `host:port`, stopping at the first failure.
pub fn diagnose_endpoint(host: &str, port: u16, timeout: Duration) -> DiagnosticReport {
    let start = Instant::now();
    let mut steps = Vec::new();

    let Some(addr) = probe_dns(host, port, &mut steps) else {
        return finish_report(host, port, None, steps, start);
    };
    let resolved_ip = Some(addr.ip().to_string());

    if let Some(stream) = probe_tcp(addr, timeout, &mut steps) {
        probe_banner(&stream, timeout, &mut steps);
    }

    finish_report(host, port, resolved_ip, steps, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn diagnostic_step_serializes_camel_case() {
        let step = DiagnosticStep::new("DNS Resolution", StepStatus::Pass, "ok".into(), Instant::now());
        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"durationMs\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn probe_dns_resolves_localhost() {
        let mut steps = Vec::new();
        let addr = probe_dns("localhost", 22, &mut steps);
        assert!(addr.is_some());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Pass);
    }

    #[test]
    fn probe_dns_fails_for_invalid_host() {
        let mut steps = Vec::new();
        let addr = probe_dns("this.host.does.not.exist.invalid", 22, &mut steps);
        assert!(addr.is_none());
        assert_eq!(steps[0].status, StepStatus::Fail);
        assert!(steps[0].message.contains("DNS"));
    }

    #[test]
    fn probe_tcp_fails_on_closed_port() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut steps = Vec::new();
        assert!(probe_tcp(addr, Duration::from_millis(200), &mut steps).is_none());
        assert_eq!(steps[0].status, StepStatus::Fail);
        assert!(steps[0].detail.is_some());
    }

    #[test]
    fn banner_probe_accepts_ssh_identification() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").unwrap();
        });

        let report = diagnose_endpoint("127.0.0.1", addr.port(), Duration::from_secs(2));
        server.join().unwrap();

        assert!(report.passed(), "{report:?}");
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[2].status, StepStatus::Pass);
        assert!(report.root_cause_hint.is_none());
    }

    #[test]
    fn banner_probe_rejects_other_protocols() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"220 ftp ready\r\n").unwrap();
        });

        let report = diagnose_endpoint("127.0.0.1", addr.port(), Duration::from_secs(2));
        server.join().unwrap();

        assert!(!report.passed());
        assert!(report.summary.contains("SSH Banner"));
        assert!(report.root_cause_hint.unwrap().contains("220"));
    }

    #[test]
    fn finish_report_picks_first_failure_hint() {
        let t = Instant::now();
        let steps = vec![
            DiagnosticStep::new("A", StepStatus::Pass, "ok".into(), t),
            DiagnosticStep::new("B", StepStatus::Fail, "down".into(), t).with_detail("restart it"),
            DiagnosticStep::new("C", StepStatus::Fail, "also down".into(), t).with_detail("later"),
        ];
        let report = finish_report("h", 22, None, steps, t);
        assert_eq!(report.root_cause_hint.as_deref(), Some("restart it"));
        assert!(report.summary.contains("B"));
    }
}
