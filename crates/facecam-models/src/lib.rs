//! facecam-models: Model artifact provisioning.
//!
//! Each artifact is looked up in the model directory; absent ones are fetched
//! from the Hugging Face Hub into a local cache and moved into place.

pub mod provisioner;
pub mod store;

pub use provisioner::{ProvisionError, Provisioned, Provisioner};
pub use store::{
    ArtifactRef, ArtifactStore, HubStore, StoreError, DEFAULT_HUB_ENDPOINT, DEFAULT_REVISION,
};
