/// Decides which consecutive I/O failures are worth a warning.
///
/// During an outage every queued envelope fails in turn, so warning on each one would flood the log at the rate of
/// the send loop. The first failure after a success warns and remembers how many envelopes were queued at that
/// moment. Further failures stay quiet until that many have gone by, after which the next failure warns again.
#[derive(Debug, Default)]
pub(super) struct FailureThrottle {
    failed_count: Option<usize>,
    queue_len_on_first_fail: usize,
}

impl FailureThrottle {
    /// Records a failure, returning `true` if it should be logged.
    pub(super) fn record_failure(&mut self, queue_len: usize) -> bool {
        match self.failed_count {
            None => {
                self.failed_count = Some(0);
                self.queue_len_on_first_fail = queue_len;
                true
            }
            Some(count) if count >= self.queue_len_on_first_fail => {
                self.failed_count = None;
                false
            }
            Some(count) => {
                self.failed_count = Some(count + 1);
                false
            }
        }
    }

    pub(super) fn record_success(&mut self) {
        self.failed_count = None;
    }
}
