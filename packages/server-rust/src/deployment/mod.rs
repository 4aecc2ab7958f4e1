//! Deployment units: descriptors, lifecycle, and the manager that mediates
//! their routes' registration.

pub mod catalog;
pub mod descriptor;
pub mod manager;
pub mod placeholders;
pub mod unit;

pub use catalog::ProcessorCatalog;
pub use descriptor::{
    ConsumesDescriptor, DescriptorProvider, DirectoryDescriptorProvider, OperationDescriptor,
    ProvidesDescriptor, UnitDescriptor,
};
pub use manager::{DeploymentManager, DeploymentSettings};
pub use placeholders::Placeholders;
pub use unit::{DeploymentUnit, LifecycleCommand, LifecycleError, UnitState};
