/// Share of the progress range filled by part transfers; the rest belongs
/// to the completion call.
pub const TRANSFER_PROGRESS_CEILING: u8 = 90;
pub const COMPLETE_PROGRESS: u8 = 100;

/// Progress of a multipart upload after `completed` of `total` parts.
pub fn transfer_progress(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    let ratio = f64::from(completed) / f64::from(total);
    (ratio * f64::from(TRANSFER_PROGRESS_CEILING)).round() as u8
}

/// Progress of a single-request upload after `sent` of `total` bytes.
pub fn byte_progress(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return COMPLETE_PROGRESS;
    }
    let sent = sent.min(total);
    ((sent as f64 / total as f64) * f64::from(COMPLETE_PROGRESS)).round() as u8
}

pub type ProgressCallback<'a> = Box<dyn FnMut(u8) + Send + 'a>;

/// Forwards progress to a caller callback, dropping anything that is not
/// strictly greater than the last value delivered.
pub struct ProgressTracker<'a> {
    callback: Option<ProgressCallback<'a>>,
    last: Option<u8>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(callback: Option<ProgressCallback<'a>>) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    pub fn report(&mut self, value: u8) {
        let value = value.min(COMPLETE_PROGRESS);
        if self.last.is_some_and(|last| value <= last) {
            return;
        }
        self.last = Some(value);
        if let Some(callback) = self.callback.as_mut() {
            callback(value);
        }
    }
}
