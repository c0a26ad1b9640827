/// Tunables for the booking service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Prefix of system-generated AWB numbers
    pub awb_prefix: String,
    /// Zero-padded width of the numeric part of generated AWB numbers
    pub awb_width: usize,
    /// How many times a unit of work is re-run after losing a race on a customer account
    pub max_retries: u32,
    /// Base delay between retries, multiplied by the attempt number
    pub retry_backoff_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            awb_prefix: "WB".to_string(),
            awb_width: 8,
            max_retries: 5,
            retry_backoff_ms: 10,
        }
    }
}
