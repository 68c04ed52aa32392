//! Hayes AT command-line parsing and result-code rendering (§4.5).
//!
//! The parser only understands the commands this modem acts on; anything
//! else answers `ERROR`, same as a real Hayes set answering a command
//! outside its repertoire.

pub const VALID_BAUDS: [u32; 8] = [300, 600, 1200, 1800, 2400, 4800, 9600, 19200];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Bare `AT`.
    Attention,
    Dial(String),
    Answer,
    Hangup,
    Reset,
    SetBaud(u32),
    SetBaudLock(bool),
    SetEcho(bool),
    SetAutoAnswer(bool),
    SetNumericResult(bool),
    SetTelnet(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Connect(u32),
    Ring,
    NoCarrier,
    Error,
}

impl ResultCode {
    /// {OK->0, CONNECT(speed)->1/5/10/18/13/85, RING->2, NO CARRIER->3, ERROR->4} (§4.5).
    pub fn numeric(self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::Connect(baud) => match baud {
                300 => 1,
                1200 => 5,
                2400 => 10,
                4800 => 18,
                9600 => 13,
                19200 => 85,
                _ => 1,
            },
            ResultCode::Ring => 2,
            ResultCode::NoCarrier => 3,
            ResultCode::Error => 4,
        }
    }

    pub fn text(self) -> String {
        match self {
            ResultCode::Ok => "OK".to_string(),
            ResultCode::Connect(baud) => format!("CONNECT {baud}"),
            ResultCode::Ring => "RING".to_string(),
            ResultCode::NoCarrier => "NO CARRIER".to_string(),
            ResultCode::Error => "ERROR".to_string(),
        }
    }

    /// Renders the result as the host would see it over the Read pipe:
    /// a bare ASCII digit, or the verbose text, either way `\r\n`-terminated.
    pub fn render(self, numeric: bool) -> Vec<u8> {
        let mut out = if numeric {
            self.numeric().to_string().into_bytes()
        } else {
            self.text().into_bytes()
        };
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Parses one command line (without the trailing CR) that already begins
/// with `AT`. Returns `None` if the command is not one this device knows,
/// which the caller turns into `ERROR`.
pub fn parse(line: &str) -> Option<Command> {
    let upper = line.trim();
    let rest = upper.strip_prefix("AT").or_else(|| upper.strip_prefix("at"))?;

    if rest.is_empty() {
        return Some(Command::Attention);
    }

    let rest = rest.trim();
    let upper_rest = rest.to_ascii_uppercase();

    if let Some(target) = upper_rest.strip_prefix("DT").or_else(|| upper_rest.strip_prefix("D")) {
        let offset = rest.len() - target.len();
        return Some(Command::Dial(rest[offset..].trim().to_string()));
    }

    match upper_rest.as_str() {
        "A" => return Some(Command::Answer),
        "H" | "H0" => return Some(Command::Hangup),
        "Z" => return Some(Command::Reset),
        "E0" => return Some(Command::SetEcho(false)),
        "E1" => return Some(Command::SetEcho(true)),
        "S0=0" => return Some(Command::SetAutoAnswer(false)),
        "S0=1" => return Some(Command::SetAutoAnswer(true)),
        "V0" => return Some(Command::SetNumericResult(true)),
        "V1" => return Some(Command::SetNumericResult(false)),
        "+BAUDLOCK=0" => return Some(Command::SetBaudLock(false)),
        "+BAUDLOCK=1" => return Some(Command::SetBaudLock(true)),
        "+TELNET=0" => return Some(Command::SetTelnet(false)),
        "+TELNET=1" => return Some(Command::SetTelnet(true)),
        _ => {}
    }

    if let Some(rate) = upper_rest.strip_prefix('B') {
        if let Ok(baud) = rate.parse::<u32>() {
            if VALID_BAUDS.contains(&baud) {
                return Some(Command::SetBaud(baud));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_at_is_attention() {
        assert_eq!(parse("AT"), Some(Command::Attention));
        assert_eq!(parse("at"), Some(Command::Attention));
    }

    #[test]
    fn dial_strips_dt_prefix() {
        assert_eq!(parse("ATDTbbs.example.com:23"), Some(Command::Dial("bbs.example.com:23".to_string())));
        assert_eq!(parse("ATDbbs.example.com:23"), Some(Command::Dial("bbs.example.com:23".to_string())));
    }

    #[test]
    fn baud_must_be_a_known_rate() {
        assert_eq!(parse("ATB2400"), Some(Command::SetBaud(2400)));
        assert_eq!(parse("ATB2401"), None);
    }

    #[test]
    fn unknown_command_is_none() {
        assert_eq!(parse("ATQ9"), None);
    }

    #[test]
    fn numeric_result_codes_match_spec_table() {
        assert_eq!(ResultCode::Ok.numeric(), 0);
        assert_eq!(ResultCode::Connect(2400).numeric(), 10);
        assert_eq!(ResultCode::Connect(19200).numeric(), 85);
        assert_eq!(ResultCode::Ring.numeric(), 2);
        assert_eq!(ResultCode::NoCarrier.numeric(), 3);
        assert_eq!(ResultCode::Error.numeric(), 4);
    }

    #[test]
    fn render_appends_crlf() {
        assert_eq!(ResultCode::Ok.render(false), b"OK\r\n");
        assert_eq!(ResultCode::Ok.render(true), b"0\r\n");
    }
}
