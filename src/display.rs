use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::process::{Command, ExitStatus};
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Preferred outbound address of this host, for log output only.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn outbound_ip() -> IpAddr {
    let route = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    route().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub fn browse_url(ip: IpAddr, port: u16, path: &str) -> String {
    format!("http://{ip}:{port}{path}")
}

/// Open `url` in the desktop's default browser. Failures are logged only.
pub fn open_browser(url: &str) {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = Command::new("rundll32");
        c.args(["url.dll,FileProtocolHandler", url]);
        c
    } else if cfg!(target_os = "macos") {
        let mut c = Command::new("open");
        c.arg(url);
        c
    } else {
        let mut c = Command::new("xdg-open");
        c.arg(url);
        c
    };
    if let Err(e) = spawn_reaped(&mut command) {
        warn!(url, error = %e, "could not open browser");
    }
}

/// Spawn `command` and wait for it on a background thread so the child is reaped.
fn spawn_reaped(
    command: &mut Command,
) -> std::io::Result<JoinHandle<std::io::Result<ExitStatus>>> {
    let mut child = command.spawn()?;
    Ok(thread::spawn(move || child.wait()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browse_url() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(browse_url(ip, 8080, "/solar"), "http://192.168.1.20:8080/solar");
    }

    #[test]
    fn test_outbound_ip_is_ipv4() {
        assert!(outbound_ip().is_ipv4());
    }

    #[cfg(unix)]
    #[test]
    fn test_spawned_child_is_waited_for() {
        let waiter = spawn_reaped(&mut Command::new("true")).unwrap();
        let status = waiter.join().unwrap().unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let result = spawn_reaped(&mut Command::new("solaros-no-such-program"));
        assert!(result.is_err());
    }
}
