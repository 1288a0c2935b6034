//! certwatch-observer — 스토리지 리소스 관찰기
//!
//! 클러스터의 PVC, Pod, VolumeAttachment 변경을 watch하여 생명주기 이벤트를 기록하고,
//! 테스트 케이스 종료 시 한 번에 저장합니다.
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`ObserverError`)
//! - [`config`]: Observer configuration (`ObserverConfig`, builder)
//! - [`watch`]: Watch abstraction (`WatchSource` trait, snapshots, `WatchHandle`)
//! - [`k8s`]: Kubernetes API adapter (`KubeWatchSource`)
//! - [`registry`]: Claim hand-off between observers (`HandoffRegistry`)
//! - [`kinds`]: Observer kinds and per-kind transition tables (`ObserverKind`)
//! - [`observer`]: Shared run loop (`Observer`, `SessionReport`)
//! - [`runner`]: Concurrent lifecycle per test case (`Runner`, `RunnerBuilder`)
//!
//! # Architecture
//!
//! ```text
//! WatchSource --mpsc--> Observer(PVC) ----publish----> HandoffRegistry
//!             --mpsc--> Observer(Pod)                       |
//!             --mpsc--> Observer(VA)  <-----lookup----------+
//!             --list--> Observer(EntityCount)
//!                            |
//!                     stop / ctx cancel
//!                            |
//!                     EventStore (one batch per observer)
//! ```

pub mod config;
pub mod error;
pub mod k8s;
pub mod kinds;
pub mod observer;
pub mod registry;
pub mod runner;
mod session;
pub mod watch;

// --- Public API Re-exports ---

// Runner
pub use runner::{Runner, RunnerBuilder, RunnerHandle, RunnerReport, RunnerState};

// Observer
pub use kinds::ObserverKind;
pub use observer::{Observer, SessionEnd, SessionReport};

// Configuration
pub use config::{ObserverConfig, ObserverConfigBuilder};

// Error
pub use error::ObserverError;

// Watch
pub use k8s::KubeWatchSource;
pub use watch::{
    AttachmentSnapshot, ChangeType, ClaimSnapshot, Notification, PodSnapshot, ResourceKind,
    ResourceSnapshot, WatchHandle, WatchSource,
};

// Registry
pub use registry::HandoffRegistry;
