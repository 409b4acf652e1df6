//! Binary command framing for the host link.
//!
//! Every command is an opcode byte followed by little-endian `u32` arguments:
//!
//! | opcode | command    | arguments       |
//! |--------|------------|-----------------|
//! | `0x01` | `Disable`  |                 |
//! | `0x02` | `GetInfo`  |                 |
//! | `0x10` | `Enable`   | channel mask    |
//! | `0x11` | `Read`     | byte count      |
//! | `0x20` | `RegRead`  | address         |
//! | `0x21` | `RegWrite` | address, value  |
//!
//! Every command is answered by an 8-byte [`Reply`]. A successful `Read` is followed
//! by up to the requested number of sample bytes. A capture that fails part way
//! closes the stream with an error reply.

use crate::config::Mode;
use crate::controller::{Backend, DeviceInfo, State};
use crate::error::{ErrorCode, EBUSY};

pub const OP_DISABLE: u8 = 0x01;
pub const OP_GET_INFO: u8 = 0x02;
pub const OP_ENABLE: u8 = 0x10;
pub const OP_READ: u8 = 0x11;
pub const OP_REG_READ: u8 = 0x20;
pub const OP_REG_WRITE: u8 = 0x21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostCommand {
    Enable(u32),
    Disable,
    Read(u32),
    RegRead(u32),
    RegWrite(u32, u32),
    GetInfo,
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Reassembles commands from the byte stream of the host link.
pub struct CommandParser {
    needle: usize,
    scratch: [u8; 64],
}

impl CommandParser {
    pub const fn new() -> Self {
        Self {
            needle: 0,
            scratch: [0; 64],
        }
    }

    /// Space for the next read from the link.
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.scratch[self.needle..]
    }

    /// Accounts for `n` bytes read into [`CommandParser::spare`].
    pub fn fill(&mut self, n: usize) {
        self.needle = (self.needle + n).min(self.scratch.len());
    }

    /// Copies as much of `bytes` as fits. Returns the count taken.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let spare = self.spare();
        let n = bytes.len().min(spare.len());
        spare[..n].copy_from_slice(&bytes[..n]);
        self.fill(n);
        n
    }

    pub fn reset(&mut self) {
        self.needle = 0;
    }

    /// Next complete command. Unknown opcodes are skipped a byte at a time.
    pub fn next_command(&mut self) -> Option<HostCommand> {
        while self.needle > 0 {
            let args = &self.scratch[1..self.needle];
            let (cmd, len) = match self.scratch[0] {
                OP_DISABLE => (HostCommand::Disable, 1),
                OP_GET_INFO => (HostCommand::GetInfo, 1),
                OP_ENABLE | OP_READ | OP_REG_READ if args.len() >= 4 => {
                    let arg = le_u32(args);
                    let cmd = match self.scratch[0] {
                        OP_ENABLE => HostCommand::Enable(arg),
                        OP_READ => HostCommand::Read(arg),
                        _ => HostCommand::RegRead(arg),
                    };
                    (cmd, 5)
                }
                OP_REG_WRITE if args.len() >= 8 => {
                    (HostCommand::RegWrite(le_u32(args), le_u32(&args[4..])), 9)
                }
                OP_ENABLE | OP_READ | OP_REG_READ | OP_REG_WRITE => return None,
                _ => {
                    self.drain_rx(1);
                    continue;
                }
            };
            self.drain_rx(len);
            return Some(cmd);
        }
        None
    }

    fn drain_rx(&mut self, n: usize) {
        self.scratch.copy_within(n..self.needle, 0);
        self.needle -= n;
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Answer to one command: a status code (0 or a negative errno) and a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reply {
    pub status: ErrorCode,
    pub value: u32,
}

impl Reply {
    pub const fn ok(value: u32) -> Self {
        Self { status: 0, value }
    }

    pub const fn err(status: ErrorCode) -> Self {
        Self { status, value: 0 }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0; 8];
        buf[..4].copy_from_slice(&self.status.to_le_bytes());
        buf[4..].copy_from_slice(&self.value.to_le_bytes());
        buf
    }
}

impl From<Result<u32, ErrorCode>> for Reply {
    fn from(res: Result<u32, ErrorCode>) -> Self {
        match res {
            Ok(value) => Reply::ok(value),
            Err(code) => Reply::err(code),
        }
    }
}

/// `GetInfo` value: channel count in bits 0..8, bytes per scan in 8..24, mode in
/// 24..28, state in 28..32.
pub fn pack_info(info: &DeviceInfo) -> u32 {
    let mode = match info.mode {
        Mode::Continuous => 0,
        Mode::Burst => 1,
    };
    info.channels as u32
        | (info.bytes_per_scan as u32) << 8
        | mode << 24
        | (info.state as u32 & 0xf) << 28
}

/// Runs `cmd` against `backend`.
///
/// The reply value of a `Read` is the byte count the link should stream. A burst
/// `Read` only checks that a session is open; [`capture`] does the work once the
/// reply is out.
pub fn execute<B: Backend>(backend: &mut B, cmd: HostCommand) -> Reply {
    let res = match cmd {
        HostCommand::Enable(mask) => backend.pre_enable(mask).map(|_| 0),
        HostCommand::Disable => backend.post_disable().map(|_| 0),
        HostCommand::Read(bytes) => {
            let info = backend.info();
            match (info.mode, info.state) {
                (Mode::Burst, State::Armed | State::Draining) | (Mode::Continuous, _) => Ok(bytes),
                (Mode::Burst, _) => Err(-EBUSY),
            }
        }
        HostCommand::RegRead(addr) => backend.debug_reg_read(addr),
        HostCommand::RegWrite(addr, value) => backend.debug_reg_write(addr, value).map(|_| 0),
        HostCommand::GetInfo => Ok(pack_info(&backend.info())),
    };
    Reply::from(res)
}

/// Captures the bytes of an acknowledged `Read`. Burst mode hands the bytes that do
/// not fit the ring buffer to `sink`; continuous mode has nothing to do.
pub fn capture<B: Backend>(
    backend: &mut B,
    bytes: u32,
    sink: &mut dyn FnMut(&[u8]),
) -> Result<(), ErrorCode> {
    match backend.info().mode {
        Mode::Burst => backend.submit(bytes, sink),
        Mode::Continuous => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_split_commands() {
        let mut parser = CommandParser::new();
        parser.push(&[OP_ENABLE, 0x03, 0x00]);
        assert_eq!(parser.next_command(), None);
        parser.push(&[0x00, 0x00, OP_GET_INFO, OP_REG_WRITE, 1, 0, 0, 0]);
        assert_eq!(parser.next_command(), Some(HostCommand::Enable(3)));
        assert_eq!(parser.next_command(), Some(HostCommand::GetInfo));
        assert_eq!(parser.next_command(), None);
        parser.push(&[0xef, 0xbe, 0, 0]);
        assert_eq!(parser.next_command(), Some(HostCommand::RegWrite(1, 0xbeef)));
        assert_eq!(parser.next_command(), None);
    }

    #[test]
    fn skips_unknown_opcodes() {
        let mut parser = CommandParser::new();
        parser.push(&[0xff, 0x00, OP_READ, 0x00, 0x01, 0, 0, OP_DISABLE]);
        assert_eq!(parser.next_command(), Some(HostCommand::Read(0x100)));
        assert_eq!(parser.next_command(), Some(HostCommand::Disable));
        assert_eq!(parser.next_command(), None);
    }

    #[test]
    fn spare_and_fill() {
        let mut parser = CommandParser::new();
        assert_eq!(parser.spare().len(), 64);
        parser.spare()[..5].copy_from_slice(&[OP_REG_READ, 7, 0, 0, 0]);
        parser.fill(5);
        assert_eq!(parser.spare().len(), 59);
        assert_eq!(parser.next_command(), Some(HostCommand::RegRead(7)));
        assert_eq!(parser.spare().len(), 64);
    }

    #[test]
    fn reply_encoding() {
        assert_eq!(
            Reply::err(-110).encode(),
            [0x92, 0xff, 0xff, 0xff, 0, 0, 0, 0]
        );
        assert_eq!(Reply::ok(0x0102_0304).encode(), [0, 0, 0, 0, 4, 3, 2, 1]);
    }

    struct Fake {
        mode: Mode,
        state: State,
        calls: Vec<HostCommand>,
    }

    impl Backend for Fake {
        fn pre_enable(&mut self, mask: u32) -> Result<(), ErrorCode> {
            self.calls.push(HostCommand::Enable(mask));
            if mask == 0 {
                return Err(-22);
            }
            Ok(())
        }

        fn trigger_handler(&mut self) -> Result<(), ErrorCode> {
            Ok(())
        }

        fn submit(&mut self, bytes: u32, sink: &mut dyn FnMut(&[u8])) -> Result<(), ErrorCode> {
            self.calls.push(HostCommand::Read(bytes));
            if bytes > 8 {
                return Err(-110);
            }
            sink(&[0xaa; 8][..bytes as usize]);
            Ok(())
        }

        fn post_disable(&mut self) -> Result<(), ErrorCode> {
            self.calls.push(HostCommand::Disable);
            Ok(())
        }

        fn debug_reg_read(&mut self, addr: u32) -> Result<u32, ErrorCode> {
            Ok(addr * 2)
        }

        fn debug_reg_write(&mut self, addr: u32, value: u32) -> Result<(), ErrorCode> {
            self.calls.push(HostCommand::RegWrite(addr, value));
            Ok(())
        }

        fn info(&self) -> DeviceInfo {
            DeviceInfo {
                channels: 4,
                bytes_per_scan: 6,
                mode: self.mode,
                state: self.state,
            }
        }
    }

    #[test]
    fn dispatch() {
        let mut fake = Fake {
            mode: Mode::Continuous,
            state: State::Armed,
            calls: Vec::new(),
        };
        assert_eq!(execute(&mut fake, HostCommand::Enable(0)), Reply::err(-22));
        assert!(execute(&mut fake, HostCommand::Enable(1)).is_ok());
        assert_eq!(execute(&mut fake, HostCommand::Read(64)), Reply::ok(64));
        assert_eq!(execute(&mut fake, HostCommand::RegRead(5)), Reply::ok(10));
        assert_eq!(
            execute(&mut fake, HostCommand::GetInfo),
            Reply::ok(4 | 6 << 8 | (State::Armed as u32) << 28)
        );
        // continuous reads stream what is there, no capture on request
        assert_eq!(capture(&mut fake, 64, &mut |_| {}), Ok(()));
        assert_eq!(fake.calls.len(), 2);
    }

    #[test]
    fn burst_read_is_acknowledged_before_capture() {
        let mut fake = Fake {
            mode: Mode::Burst,
            state: State::Armed,
            calls: Vec::new(),
        };
        assert_eq!(execute(&mut fake, HostCommand::Read(64)), Reply::ok(64));
        assert!(fake.calls.is_empty());

        let mut streamed = Vec::new();
        assert_eq!(capture(&mut fake, 4, &mut |b| streamed.extend_from_slice(b)), Ok(()));
        assert_eq!(streamed, [0xaa; 4]);
        assert_eq!(capture(&mut fake, 64, &mut |_| {}), Err(-110));
        assert_eq!(fake.calls, [HostCommand::Read(4), HostCommand::Read(64)]);

        fake.state = State::Idle;
        assert_eq!(execute(&mut fake, HostCommand::Read(64)), Reply::err(-EBUSY));
    }
}
