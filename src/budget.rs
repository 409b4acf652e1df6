use crate::error::Error;

/// Iteration budget for a busy-wait.
///
/// There is no clock to wait on, so a wait is bounded by how many times its condition
/// is polled. The absolute duration depends on the core clock and the cost of the
/// condition, which makes the count calibration data for a given board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Budget {
    iterations: u32,
}

impl Budget {
    pub const fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Polls `ready` until it reports `true`, at most `iterations` times.
    ///
    /// Returns [`Error::Timeout`] once the budget is spent. Errors from `ready` end
    /// the wait immediately.
    pub fn poll<E, F>(&self, mut ready: F) -> Result<(), Error<E>>
    where
        F: FnMut() -> Result<bool, Error<E>>,
    {
        for _ in 0..self.iterations {
            if ready()? {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polls_exactly_the_budget() {
        let mut polls = 0;
        let res: Result<(), Error<()>> = Budget::new(250).poll(|| {
            polls += 1;
            Ok(false)
        });
        assert_eq!(res, Err(Error::Timeout));
        assert_eq!(polls, 250);
    }

    #[test]
    fn stops_when_ready() {
        let mut polls = 0;
        let res: Result<(), Error<()>> = Budget::new(100).poll(|| {
            polls += 1;
            Ok(polls == 3)
        });
        assert_eq!(res, Ok(()));
        assert_eq!(polls, 3);
    }

    #[test]
    fn condition_error_ends_wait() {
        let mut polls = 0;
        let res = Budget::new(100).poll(|| {
            polls += 1;
            Err::<bool, _>(Error::Bus(9u8))
        });
        assert_eq!(res, Err(Error::Bus(9)));
        assert_eq!(polls, 1);
    }

    #[test]
    fn empty_budget_times_out_without_polling() {
        let res: Result<(), Error<()>> = Budget::new(0).poll(|| panic!("polled"));
        assert_eq!(res, Err(Error::Timeout));
    }
}
