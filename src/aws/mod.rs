//! AWS-backed implementations of the source and sink traits
//!
//! The SDK clients are async; each adapter owns a private current-thread
//! Tokio runtime and blocks on every call, so the pipeline stays
//! synchronous. Credentials come from the default provider chain:
//! 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
//! 2. AWS credentials file (~/.aws/credentials)
//! 3. IAM role (if running on AWS infrastructure)

mod eventbridge;
mod health;

pub use eventbridge::EventBridgeSink;
pub use health::AwsHealthApi;

use aws_config::{BehaviorVersion, SdkConfig};
use tokio::runtime::Runtime;

fn current_thread_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn load_sdk_config(runtime: &Runtime, region: &str) -> SdkConfig {
    runtime.block_on(
        aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load(),
    )
}
