pub mod gandi;
pub mod record;

pub use record::{Record, RecordType};

#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn list_records(&self, domain: &str) -> Result<Vec<Record>, Self::Error>;
    /// Overwrites the whole record set of `domain`.
    async fn replace_records(&self, domain: &str, records: &[Record]) -> Result<(), Self::Error>;
}
