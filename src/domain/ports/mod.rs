mod clock_port;
mod codec_port;
mod identifier_port;
mod resizer_port;

pub use clock_port::Clock;
pub use codec_port::ImageCodec;
pub use identifier_port::IdentifierDeriver;
pub use resizer_port::ImageResizer;

#[cfg(test)]
pub mod mocks {
    pub use super::clock_port::mock::{ManualClock, epoch_secs};
    pub use super::identifier_port::mock::NoIdentifier;
    pub use super::resizer_port::mock::{CountingResizer, FailingResizer, PanickingResizer};
}
