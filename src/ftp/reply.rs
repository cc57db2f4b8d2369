use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

/// A complete server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub(crate) code: u16,
    pub(crate) lines: Vec<String>,
}

impl Reply {
    /// Reply text on one line
    pub(crate) fn message(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns true if a FEAT reply lists `feature`
    pub(crate) fn has_feature(&self, feature: &str) -> bool {
        // the first and last lines are the "211-" header and "211 End" trailer
        let count = self.lines.len();
        if count < 3 {
            return false;
        }
        let feature = feature.as_bytes();
        self.lines[1..count - 1].iter().any(|line| {
            // server text may hold multi-byte chars, so compare bytes
            let line = line.trim().as_bytes();
            line.len() >= feature.len()
                && line[..feature.len()].eq_ignore_ascii_case(feature)
                && line.get(feature.len()).is_none_or(|&b| b == b' ')
        })
    }

    /// Data connection address from a "227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)" reply
    pub(crate) fn parse_pasv_227(&self) -> Option<SocketAddr> {
        let line = self.lines.last()?;
        let p_start = line.find('(')?;
        let p_end = p_start + line[p_start..].find(')')?;

        let a: Vec<u8> = line[p_start + 1..p_end]
            .split(',')
            .map(|s| s.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        if a.len() != 6 {
            return None;
        }

        let ip = IpAddr::V4(Ipv4Addr::new(a[0], a[1], a[2], a[3]));
        let port = ((a[4] as u16) << 8) + (a[5] as u16);
        Some(SocketAddr::new(ip, port))
    }
}

pub(crate) enum FirstLine {
    Single(Reply),
    Multi(MultiLineParser),
}

/// Parse the first line of a reply, CRLF already stripped
pub(crate) fn parse_first_line(line: &str) -> Option<FirstLine> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code = (bytes[0] - b'0') as u16 * 100 + (bytes[1] - b'0') as u16 * 10 + (bytes[2] - b'0') as u16;
    if !(100..600).contains(&code) {
        return None;
    }

    match bytes.get(3) {
        None => Some(FirstLine::Single(Reply {
            code,
            lines: vec![String::new()],
        })),
        Some(b' ') => Some(FirstLine::Single(Reply {
            code,
            lines: vec![line[4..].to_string()],
        })),
        Some(b'-') => Some(FirstLine::Multi(MultiLineParser {
            code,
            end_prefix: format!("{} ", &line[..3]),
            lines: vec![line[4..].to_string()],
        })),
        Some(_) => None,
    }
}

pub(crate) struct MultiLineParser {
    code: u16,
    end_prefix: String,
    lines: Vec<String>,
}

impl MultiLineParser {
    /// Feed one more line; returns true once the closing line was seen
    pub(crate) fn feed_line(&mut self, line: &str) -> bool {
        if line.starts_with(&self.end_prefix) {
            self.lines.push(line[4..].to_string());
            true
        } else if line == &self.end_prefix[..3] {
            self.lines.push(String::new());
            true
        } else {
            // do not trim whitespace at beginning
            self.lines.push(line.to_string());
            false
        }
    }

    pub(crate) fn finish(self) -> Reply {
        Reply {
            code: self.code,
            lines: self.lines,
        }
    }
}

/// Argument of a PORT command for a local listener
pub(crate) fn port_argument(addr: SocketAddrV4) -> String {
    let [h1, h2, h3, h4] = addr.ip().octets();
    let port = addr.port();
    format!("{h1},{h2},{h3},{h4},{},{}", port >> 8, port & 0xff)
}
