/// Tuning knobs for a single [crate::Endpoint]. These are the fixed values
/// that the experiment flags in [crate::experiments] decide whether to
/// consult; constructing one per connection is cheap.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Receive buffer size used when no frame-size estimate is available.
    pub default_read_size: usize,

    /// Minimum number of bytes a read must accumulate before completing, when
    /// the `read_low_watermark` experiment is enabled.
    pub read_low_watermark: usize,

    /// Hard cap on the size of a single outbound send submitted to the OS.
    /// The `peer_framing` experiment may lower the effective cap further.
    pub max_outbound_frame: usize,

    /// Number of consecutive zero-byte send completions tolerated before a
    /// write is failed rather than re-issued.
    pub stalled_write_limit: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            default_read_size: 8192,
            read_low_watermark: 1,
            max_outbound_frame: 1024 * 1024,
            stalled_write_limit: 8,
        }
    }
}
