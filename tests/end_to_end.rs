use iio_capture::{
    AcquisitionController, Channel, ChannelSet, Config, RingBuffer, SampleSource, State,
    TriggerSource,
};

/// Two-channel 16-bit part: scan `i` reads `[100 + i, 200 + i]`.
#[derive(Default)]
struct DualAdc {
    scan: u32,
    running: bool,
}

impl SampleSource for DualAdc {
    type Error = ();

    fn start_conversion(&mut self, mask: u32) -> Result<(), ()> {
        assert_eq!(mask, 0b11);
        self.running = true;
        Ok(())
    }

    fn stop_conversion(&mut self) -> Result<(), ()> {
        self.running = false;
        Ok(())
    }

    fn read_single(&mut self, channel: u8) -> Result<u32, ()> {
        match channel {
            0 => Ok(100 + self.scan),
            _ => {
                let code = 200 + self.scan;
                self.scan += 1;
                Ok(code)
            }
        }
    }

    fn read_register(&mut self, _addr: u32) -> Result<u32, ()> {
        Err(())
    }

    fn write_register(&mut self, _addr: u32, _value: u32) -> Result<(), ()> {
        Err(())
    }
}

#[derive(Default)]
struct Edge {
    enabled: bool,
}

impl TriggerSource for Edge {
    type Error = ();

    fn enable(&mut self) -> Result<(), ()> {
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ()> {
        self.enabled = false;
        Ok(())
    }

    fn clear_pending(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn take_pending(&mut self) -> Result<bool, ()> {
        Ok(false)
    }
}

#[test]
fn ten_edges_arrive_in_order() {
    let mut storage = [0u8; 1024];
    let channels = ChannelSet::new([Channel::new(0, 16), Channel::new(1, 16)]);
    let mut ctl = AcquisitionController::new(
        DualAdc::default(),
        Edge::default(),
        channels,
        RingBuffer::new(&mut storage),
        Config::default(),
    );

    ctl.prepare_transfer(0b11).unwrap();
    assert_eq!(ctl.state(), State::Armed);
    for _ in 0..10 {
        ctl.trigger_handler().unwrap();
    }
    assert_eq!(ctl.state(), State::Streaming);
    assert_eq!(ctl.available(), 40);

    let mut out = [0u8; 64];
    assert_eq!(ctl.read(&mut out), 40);
    let samples: Vec<u16> = out[..40]
        .chunks(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    let expected: Vec<u16> = (0..10).flat_map(|i| [100 + i, 200 + i]).collect();
    assert_eq!(samples, expected);

    ctl.end_transfer().unwrap();
    assert_eq!(ctl.state(), State::Idle);
    assert!(!ctl.source().running);
    assert!(!ctl.trigger().inner().enabled);
}
