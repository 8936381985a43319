pub mod archive;
pub mod before;
pub mod build;
pub mod checksum;
pub mod dist;
pub mod effective;
pub mod package;
pub mod publish;

use crate::pipeline::StageRegistry;

pub fn register_defaults(registry: &mut StageRegistry) {
    registry.register(dist::NAME, || Box::new(dist::DistStage));
    registry.register(effective::NAME, || Box::new(effective::EffectiveConfigStage));
    registry.register(before::NAME, || Box::new(before::BeforeStage));
    registry.register(build::NAME, || Box::new(build::BuildStage));
    registry.register(archive::NAME, || Box::new(archive::ArchiveStage));
    registry.register(package::NAME, || Box::new(package::PackageStage));
    registry.register(checksum::NAME, || Box::new(checksum::ChecksumStage));
    registry.register(publish::NAME, || Box::new(publish::PublishStage));
}

/// Registry holding every built-in stage.
pub fn default_registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    register_defaults(&mut registry);
    registry
}

/// Sets `field` to `default` when it is empty.
pub(crate) fn default_string(field: &mut String, default: &str) {
    if field.is_empty() {
        *field = default.to_string();
    }
}
