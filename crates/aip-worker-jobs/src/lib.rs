// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provisioning job engine for the aip worker.
//!
//! A job is popped from the shared queue, its template resolved against the
//! allow-list, job-scoped AWS credentials obtained through STS, and terraform
//! driven through `init` and then `plan` or `apply`. Successful applies have
//! their `terraform output -json` recorded on the owning deployment. Every
//! run's lifecycle is written back through [`RunStateTracker`].
//!
//! The seams are traits so the engine can run without Redis, AWS or a
//! terraform binary:
//!
//! | Trait | Production | Testing |
//! |-------|------------|---------|
//! | [`JobQueue`] | [`RedisJobQueue`] | `testing::InMemoryJobQueue` |
//! | [`CredentialBroker`] | [`StsCredentialBroker`] | `testing::StaticCredentialBroker` |
//! | [`Provisioner`] | [`TerraformProvisioner`] | `testing::ScriptedProvisioner` |

pub mod consumer;
pub mod context;
pub mod credentials;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod outputs;
pub mod pool;
pub mod provisioner;
pub mod queue;
pub mod templates;
pub mod tracker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use consumer::{JobConsumer, JobOutcome};
pub use context::{CancellationToken, WorkerDeps};
pub use credentials::{
	CredentialBroker, CredentialError, ResolvedRole, ScopedCredentials, StsCredentialBroker,
};
pub use driver::{PhaseSummary, PhaseTimeouts, ProvisioningDriver};
pub use envelope::{Action, JobEnvelope, RoleDescriptor};
pub use error::{JobError, Result};
pub use outputs::{OutputCaptureError, OutputCapturer};
pub use pool::WorkerPool;
pub use provisioner::{
	Phase, PhaseError, PhaseInvocation, PhaseOutput, Provisioner, TerraformProvisioner,
};
pub use queue::{JobQueue, QueueError, RedisJobQueue};
pub use templates::TemplateCatalog;
pub use tracker::{RunStart, RunStateTracker};
