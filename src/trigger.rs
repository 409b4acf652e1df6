use portable_atomic::{AtomicBool, Ordering};

/// Stimulus that starts one acquisition cycle: a data-ready edge interrupt or a PWM
/// timer.
pub trait TriggerSource {
    type Error;

    /// Lets the trigger fire.
    fn enable(&mut self) -> Result<(), Self::Error>;

    /// Stops the trigger from firing. Must be safe to call when already disabled.
    fn disable(&mut self) -> Result<(), Self::Error>;

    /// Forgets an edge latched while the trigger was disabled.
    fn clear_pending(&mut self) -> Result<(), Self::Error>;

    /// Consumes a latched edge. Burst capture polls this instead of taking an
    /// interrupt per scan.
    fn take_pending(&mut self) -> Result<bool, Self::Error>;
}

/// Trigger for devices paced by their own DMA stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrigger;

impl TriggerSource for NoTrigger {
    type Error = core::convert::Infallible;

    fn enable(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn clear_pending(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn take_pending(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

/// A trigger source together with its enable state for the current session.
pub struct TriggerBinding<T> {
    trigger: T,
    enabled: bool,
}

impl<T: TriggerSource> TriggerBinding<T> {
    pub fn new(trigger: T) -> Self {
        Self {
            trigger,
            enabled: false,
        }
    }

    /// Drops stale edges and enables the trigger.
    pub fn arm(&mut self) -> Result<(), T::Error> {
        self.trigger.clear_pending()?;
        self.trigger.enable()?;
        self.enabled = true;
        Ok(())
    }

    pub fn disarm(&mut self) -> Result<(), T::Error> {
        self.trigger.disable()?;
        self.enabled = false;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disables the trigger for the duration of a bus transaction.
    ///
    /// The trigger stays disabled until [`Suppressed::rearm`] is called. A guard that
    /// is dropped on an error path leaves it disabled, so a failed read stops the
    /// capture instead of retriggering on its own bus activity.
    pub fn suppress(&mut self) -> Result<Suppressed<'_, T>, T::Error> {
        self.disarm()?;
        Ok(Suppressed {
            binding: self,
            rearmed: false,
        })
    }

    pub fn take_pending(&mut self) -> Result<bool, T::Error> {
        self.trigger.take_pending()
    }

    pub fn inner(&self) -> &T {
        &self.trigger
    }

    pub fn free(self) -> T {
        self.trigger
    }
}

/// Scope in which the trigger is disabled. See [`TriggerBinding::suppress`].
#[must_use = "the trigger stays disabled until the guard is rearmed"]
pub struct Suppressed<'b, T> {
    binding: &'b mut TriggerBinding<T>,
    rearmed: bool,
}

impl<T: TriggerSource> Suppressed<'_, T> {
    /// Clears the edge latched by the transaction and enables the trigger again.
    pub fn rearm(mut self) -> Result<(), T::Error> {
        self.rearmed = true;
        self.binding.arm()
    }
}

impl<T> Drop for Suppressed<'_, T> {
    fn drop(&mut self) {
        if !self.rearmed {
            warn!("trigger left disabled");
        }
    }
}

/// One-bit flag raised from interrupt context and consumed by a polling loop.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether the flag was raised and lowers it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Edge {
        enabled: bool,
        pending: bool,
        log: Vec<&'static str>,
    }

    impl TriggerSource for Edge {
        type Error = ();

        fn enable(&mut self) -> Result<(), ()> {
            self.enabled = true;
            self.log.push("enable");
            Ok(())
        }

        fn disable(&mut self) -> Result<(), ()> {
            self.enabled = false;
            self.log.push("disable");
            Ok(())
        }

        fn clear_pending(&mut self) -> Result<(), ()> {
            self.pending = false;
            self.log.push("clear");
            Ok(())
        }

        fn take_pending(&mut self) -> Result<bool, ()> {
            Ok(core::mem::take(&mut self.pending))
        }
    }

    #[test]
    fn arm_clears_before_enabling() {
        let mut binding = TriggerBinding::new(Edge {
            pending: true,
            ..Default::default()
        });
        binding.arm().unwrap();
        assert!(binding.is_enabled());
        assert_eq!(binding.inner().log, ["clear", "enable"]);
        assert!(!binding.inner().pending);
    }

    #[test]
    fn rearm_after_transaction() {
        let mut binding = TriggerBinding::new(Edge::default());
        binding.arm().unwrap();
        let guard = binding.suppress().unwrap();
        guard.rearm().unwrap();
        assert!(binding.is_enabled());
        assert_eq!(
            binding.inner().log,
            ["clear", "enable", "disable", "clear", "enable"]
        );
    }

    #[test]
    fn dropped_guard_leaves_trigger_disabled() {
        let mut binding = TriggerBinding::new(Edge::default());
        binding.arm().unwrap();
        let guard = binding.suppress().unwrap();
        drop(guard);
        assert!(!binding.is_enabled());
        assert!(!binding.free().enabled);
    }

    #[test]
    fn disarm_twice() {
        let mut binding = TriggerBinding::new(Edge::default());
        binding.disarm().unwrap();
        binding.disarm().unwrap();
        assert!(!binding.is_enabled());
    }

    #[test]
    fn take_pending_consumes_edge() {
        let mut binding = TriggerBinding::new(Edge {
            pending: true,
            ..Default::default()
        });
        assert_eq!(binding.take_pending(), Ok(true));
        assert_eq!(binding.take_pending(), Ok(false));
    }

    #[test]
    fn latch() {
        let latch = Latch::new();
        assert!(!latch.take());
        latch.signal();
        assert!(latch.is_set());
        assert!(latch.take());
        assert!(!latch.is_set());
        latch.signal();
        latch.clear();
        assert!(!latch.take());
    }
}
