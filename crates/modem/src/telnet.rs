//! RFC 854 subset (§4.5): IAC byte-doubling on the outgoing path, and a
//! small state machine answering DO/WILL/WONT/DONT negotiation and TTYPE
//! subnegotiation on the incoming path.

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_TTYPE: u8 = 24;

const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

/// Default terminal type the modem answers `IAC SB TTYPE SEND` with, when
/// the owning `ModemDevice` hasn't been configured with one of its own
/// (§3 Data model: "terminal-type string").
pub const DEFAULT_TERMINAL_TYPE: &str = "FUJINET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SawIac,
    SawCommand(u8),
    SawSb,
    SawSbIac,
}

/// Strips and answers telnet negotiation on a stream read from the peer;
/// bytes that are ordinary data pass through to `visible`.
pub struct TelnetFilter {
    state: State,
    sb_opt: u8,
    sb_buf: Vec<u8>,
    terminal_type: Vec<u8>,
    pub echo_hint: Option<bool>,
}

impl Default for TelnetFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINAL_TYPE)
    }
}

impl TelnetFilter {
    pub fn new(terminal_type: impl AsRef<str>) -> Self {
        Self {
            state: State::Normal,
            sb_opt: 0,
            sb_buf: Vec::new(),
            terminal_type: terminal_type.as_ref().as_bytes().to_vec(),
            echo_hint: None,
        }
    }

    pub fn set_terminal_type(&mut self, terminal_type: impl AsRef<str>) {
        self.terminal_type = terminal_type.as_ref().as_bytes().to_vec();
    }

    /// Consumes `input`, returning `(visible, replies)`: `visible` is data
    /// bytes with all negotiation removed, `replies` is what to write back
    /// to the peer (possibly empty).
    pub fn process_incoming(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut visible = Vec::new();
        let mut replies = Vec::new();

        for &b in input {
            match self.state {
                State::Normal => {
                    if b == IAC {
                        self.state = State::SawIac;
                    } else {
                        visible.push(b);
                    }
                }
                State::SawIac => match b {
                    IAC => {
                        visible.push(IAC);
                        self.state = State::Normal;
                    }
                    DO | DONT | WILL | WONT => self.state = State::SawCommand(b),
                    SB => {
                        self.sb_buf.clear();
                        self.state = State::SawSb;
                    }
                    _ => self.state = State::Normal,
                },
                State::SawCommand(cmd) => {
                    let opt = b;
                    match cmd {
                        DO => {
                            if opt == OPT_TTYPE {
                                replies.extend_from_slice(&[IAC, WILL, opt]);
                            } else {
                                replies.extend_from_slice(&[IAC, WONT, opt]);
                            }
                        }
                        DONT => {
                            replies.extend_from_slice(&[IAC, WONT, opt]);
                        }
                        WILL => {
                            if opt == OPT_ECHO {
                                self.echo_hint = Some(false);
                            }
                        }
                        WONT => {
                            if opt == OPT_ECHO {
                                self.echo_hint = Some(true);
                            }
                        }
                        _ => unreachable!("SawCommand only holds DO/DONT/WILL/WONT"),
                    }
                    self.state = State::Normal;
                }
                State::SawSb => {
                    if b == IAC {
                        self.state = State::SawSbIac;
                    } else if self.sb_buf.is_empty() {
                        self.sb_opt = b;
                    } else {
                        self.sb_buf.push(b);
                    }
                }
                State::SawSbIac => {
                    if b == SE {
                        if self.sb_opt == OPT_TTYPE && self.sb_buf.first() == Some(&TTYPE_SEND) {
                            replies.extend_from_slice(&[IAC, SB, OPT_TTYPE, TTYPE_IS]);
                            replies.extend_from_slice(&self.terminal_type);
                            replies.extend_from_slice(&[IAC, SE]);
                        }
                        self.sb_buf.clear();
                        self.state = State::Normal;
                    } else {
                        // IAC IAC inside a subnegotiation: keep one 0xFF.
                        self.sb_buf.push(b);
                        self.state = State::SawSb;
                    }
                }
            }
        }
        (visible, replies)
    }
}

/// Doubles `0xFF` bytes before they go out to the peer (§4.5).
pub fn escape_outgoing(data: &[u8]) -> Vec<u8> {
    if !data.contains(&IAC) {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}
