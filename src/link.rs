use defmt::{debug, warn};
use hal::usb::UsbBus;
use iio_capture::host::{self, CommandParser, HostCommand, Reply};
use iio_capture::Mode;
use usb_device::prelude::*;
use usb_device::UsbError;
use usbd_serial::SerialPort;

use crate::board::Controller;

const CHUNK: usize = 64;
/// Consecutive refused writes before a burst pass gives up on the host.
const WRITE_STALLS: u32 = 20_000;

/// USB CDC link to the host: command replies and the sample stream.
pub struct HostLink {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    parser: CommandParser,
    /// Sample bytes still owed for the last `Read`.
    pending: usize,
    staged: [u8; CHUNK],
    staged_len: usize,
    staged_pos: usize,
}

impl HostLink {
    pub fn new(usb_dev: UsbDevice<'static, UsbBus>, serial: SerialPort<'static, UsbBus>) -> Self {
        Self {
            serial,
            usb_dev,
            parser: CommandParser::new(),
            pending: 0,
            staged: [0; CHUNK],
            staged_len: 0,
            staged_pos: 0,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.pending > 0 || self.staged_pos < self.staged_len
    }

    pub fn poll(&mut self, ctl: &mut Controller) {
        if self.usb_dev.poll(&mut [&mut self.serial]) {
            if let Ok(n) = self.serial.read(self.parser.spare()) {
                self.parser.fill(n);
            }
            while let Some(cmd) = self.parser.next_command() {
                self.dispatch(ctl, cmd);
            }
        }

        if let Some(code) = ctl.take_fault() {
            warn!("capture fault {}, stream closed", code);
            self.abort_stream();
            self.serial.write(&Reply::err(code).encode()).ok();
        }
        self.stream(ctl);
    }

    fn dispatch(&mut self, ctl: &mut Controller, cmd: HostCommand) {
        debug!("host: {}", cmd);
        if cmd == HostCommand::Disable {
            self.abort_stream();
        }
        let reply = host::execute(ctl, cmd);
        write_all(&mut self.usb_dev, &mut self.serial, &reply.encode());
        if let (HostCommand::Read(bytes), true) = (cmd, reply.is_ok()) {
            self.pending = reply.value as usize;
            self.capture(ctl, bytes);
        }
    }

    /// Passes of a burst that outgrow the ring buffer go straight out to the host.
    fn capture(&mut self, ctl: &mut Controller, bytes: u32) {
        let Self {
            usb_dev,
            serial,
            pending,
            ..
        } = self;
        let mut delivered = true;
        let res = host::capture(ctl, bytes, &mut |chunk| {
            *pending = pending.saturating_sub(chunk.len());
            delivered &= write_all(usb_dev, serial, chunk);
        });
        match res {
            Err(code) => {
                warn!("capture failed {}, stream closed", code);
                self.abort_stream();
                write_all(&mut self.usb_dev, &mut self.serial, &Reply::err(code).encode());
            }
            Ok(()) if !delivered => {
                warn!("host stopped reading, stream closed");
                self.abort_stream();
            }
            Ok(()) if ctl.config().mode == Mode::Burst => {
                self.pending = self.pending.min(ctl.available());
            }
            Ok(()) => {}
        }
    }

    fn stream(&mut self, ctl: &mut Controller) {
        while self.is_streaming() {
            if self.staged_pos == self.staged_len {
                let want = self.pending.min(CHUNK);
                let n = ctl.read(&mut self.staged[..want]);
                if n == 0 {
                    break;
                }
                self.pending -= n;
                self.staged_len = n;
                self.staged_pos = 0;
            }
            match self.serial.write(&self.staged[self.staged_pos..self.staged_len]) {
                Ok(0) | Err(UsbError::WouldBlock) => break,
                Ok(n) => self.staged_pos += n,
                Err(_) => {
                    self.abort_stream();
                    break;
                }
            }
        }
    }

    fn abort_stream(&mut self) {
        self.pending = 0;
        self.staged_len = 0;
        self.staged_pos = 0;
    }
}

/// Writes all of `bytes`, servicing the bus while the endpoint is full. Returns false
/// if the host stops taking data.
fn write_all(
    usb_dev: &mut UsbDevice<'static, UsbBus>,
    serial: &mut SerialPort<'static, UsbBus>,
    mut bytes: &[u8],
) -> bool {
    let mut stalls = 0;
    while !bytes.is_empty() {
        match serial.write(bytes) {
            Ok(0) | Err(UsbError::WouldBlock) => {
                stalls += 1;
                if stalls > WRITE_STALLS {
                    return false;
                }
                usb_dev.poll(&mut [&mut *serial]);
            }
            Ok(n) => {
                bytes = &bytes[n..];
                stalls = 0;
            }
            Err(_) => return false,
        }
    }
    true
}
