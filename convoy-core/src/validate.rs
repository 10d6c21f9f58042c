//! Group invariant checks
//!
//! Runs before the controller touches any resource. Port number collisions
//! are not checked here: they belong to the port allocator, which reports
//! them as [`crate::PortConflictError`].

use std::collections::{HashMap, HashSet};

use crate::types::{is_c_identifier, is_dns_label, is_valid_path};
use crate::{ContainerSpec, Group, ValidationError};

/// Validate every manifest-level invariant of a group
///
/// Checks run in declaration order and stop at the first violation.
///
/// # Errors
/// Returns the first [`ValidationError`] found
pub fn validate_group(group: &Group) -> Result<(), ValidationError> {
    let volumes = validate_volumes(group)?;

    let mut container_names = HashSet::new();
    let mut port_names: HashMap<&str, &str> = HashMap::new();

    for (index, container) in group.containers.iter().enumerate() {
        if !is_dns_label(&container.name) {
            return Err(ValidationError::InvalidName {
                field: format!("containers[{index}].name"),
                value: container.name.clone(),
            });
        }
        if !container_names.insert(container.name.as_str()) {
            return Err(ValidationError::DuplicateContainer {
                index,
                name: container.name.clone(),
            });
        }

        validate_container(container, &volumes, &mut port_names)?;
    }

    tracing::debug!(
        group = %group.name,
        containers = group.containers.len(),
        volumes = group.volumes.len(),
        "group passed validation"
    );

    Ok(())
}

fn validate_volumes(group: &Group) -> Result<HashSet<&str>, ValidationError> {
    let mut names = HashSet::new();
    for (index, volume) in group.volumes.iter().enumerate() {
        if !is_dns_label(&volume.name) {
            return Err(ValidationError::InvalidName {
                field: format!("volumes[{index}].name"),
                value: volume.name.clone(),
            });
        }
        if !names.insert(volume.name.as_str()) {
            return Err(ValidationError::DuplicateVolume {
                index,
                name: volume.name.clone(),
            });
        }
    }
    Ok(names)
}

fn validate_container<'a>(
    container: &'a ContainerSpec,
    volumes: &HashSet<&str>,
    port_names: &mut HashMap<&'a str, &'a str>,
) -> Result<(), ValidationError> {
    let name = &container.name;

    if container.image.trim().is_empty() {
        return Err(ValidationError::MissingImage {
            container: name.clone(),
        });
    }

    if let Some(dir) = &container.working_dir {
        if !is_valid_path(dir) {
            return Err(ValidationError::InvalidPath {
                field: format!("containers[{name}].workingDir"),
                path: dir.clone(),
            });
        }
    }

    for (index, port) in container.ports.iter().enumerate() {
        if !is_dns_label(&port.name) {
            return Err(ValidationError::InvalidName {
                field: format!("containers[{name}].ports[{index}].name"),
                value: port.name.clone(),
            });
        }
        if let Some(first) = port_names.insert(&port.name, name) {
            return Err(ValidationError::DuplicatePortName {
                port: port.name.clone(),
                first: first.to_string(),
                second: name.clone(),
            });
        }
        if port.container_port == 0 {
            return Err(ValidationError::InvalidPort {
                field: format!("containers[{name}].ports[{}].containerPort", port.name),
                port: port.container_port,
            });
        }
        if port.host_port == Some(0) {
            return Err(ValidationError::InvalidPort {
                field: format!("containers[{name}].ports[{}].hostPort", port.name),
                port: 0,
            });
        }
    }

    let mut mount_paths = HashSet::new();
    for (index, mount) in container.volume_mounts.iter().enumerate() {
        if !is_dns_label(&mount.name) {
            return Err(ValidationError::InvalidName {
                field: format!("containers[{name}].volumeMounts[{index}].name"),
                value: mount.name.clone(),
            });
        }
        if !volumes.contains(mount.name.as_str()) {
            return Err(ValidationError::UnknownVolume {
                container: name.clone(),
                volume: mount.name.clone(),
            });
        }
        if !is_valid_path(&mount.path) {
            return Err(ValidationError::InvalidPath {
                field: format!("containers[{name}].volumeMounts[{}].path", mount.name),
                path: mount.path.clone(),
            });
        }
        if !mount_paths.insert(mount.path.as_str()) {
            return Err(ValidationError::DuplicateMountPath {
                container: name.clone(),
                path: mount.path.clone(),
            });
        }
    }

    for var in &container.env {
        if !is_c_identifier(&var.key) {
            return Err(ValidationError::InvalidEnvKey {
                container: name.clone(),
                key: var.key.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GroupName, PortMapping, Volume, VolumeMount};

    fn group() -> Group {
        Group::new(GroupName::default())
    }

    #[test]
    fn test_valid_group() {
        let g = group()
            .with_volume(Volume::new("data"))
            .with_container(
                ContainerSpec::new("web", "nginx")
                    .with_working_dir("/srv")
                    .with_port(PortMapping::new("http", 80))
                    .with_mount(VolumeMount::new("data", "/data"))
                    .with_env("MODE", "prod"),
            )
            .with_container(
                ContainerSpec::new("sidecar", "busybox")
                    .with_mount(VolumeMount::new("data", "/data").read_only()),
            );

        assert!(validate_group(&g).is_ok());
    }

    #[test]
    fn test_empty_group_is_valid() {
        assert!(validate_group(&group()).is_ok());
    }

    #[test]
    fn test_invalid_container_name() {
        let g = group().with_container(ContainerSpec::new("Web_1", "img"));
        assert_eq!(
            validate_group(&g),
            Err(ValidationError::InvalidName {
                field: "containers[0].name".to_string(),
                value: "Web_1".to_string(),
            })
        );
    }

    #[test]
    fn test_duplicate_container_name() {
        let g = group()
            .with_container(ContainerSpec::new("a", "img"))
            .with_container(ContainerSpec::new("a", "img"));
        assert_eq!(
            validate_group(&g),
            Err(ValidationError::DuplicateContainer {
                index: 1,
                name: "a".to_string()
            })
        );
    }

    #[test]
    fn test_duplicate_volume_name() {
        let g = group().with_volume(Volume::new("v")).with_volume(Volume::new("v"));
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::DuplicateVolume { index: 1, .. })
        ));
    }

    #[test]
    fn test_missing_image() {
        let g = group().with_container(ContainerSpec::new("a", ""));
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::MissingImage { .. })
        ));
    }

    #[test]
    fn test_relative_working_dir() {
        let g = group().with_container(ContainerSpec::new("a", "img").with_working_dir("tmp"));
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_port_name_unique_group_wide() {
        let g = group()
            .with_container(ContainerSpec::new("a", "img").with_port(PortMapping::new("p", 80)))
            .with_container(ContainerSpec::new("b", "img").with_port(PortMapping::new("p", 81)));
        assert_eq!(
            validate_group(&g),
            Err(ValidationError::DuplicatePortName {
                port: "p".to_string(),
                first: "a".to_string(),
                second: "b".to_string(),
            })
        );
    }

    #[test]
    fn test_zero_ports_rejected() {
        let g = group().with_container(ContainerSpec::new("a", "img").with_port(PortMapping::new("p", 0)));
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::InvalidPort { port: 0, .. })
        ));

        let g = group().with_container(
            ContainerSpec::new("a", "img").with_port(PortMapping::new("p", 80).with_host_port(0)),
        );
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_dangling_volume_mount() {
        let g = group().with_container(
            ContainerSpec::new("a", "img").with_mount(VolumeMount::new("missing", "/m")),
        );
        assert_eq!(
            validate_group(&g),
            Err(ValidationError::UnknownVolume {
                container: "a".to_string(),
                volume: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_mount_path_rules() {
        let too_long = format!("/{}", "x".repeat(512));
        let g = group()
            .with_volume(Volume::new("v"))
            .with_container(ContainerSpec::new("a", "img").with_mount(VolumeMount::new("v", too_long)));
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::InvalidPath { .. })
        ));

        let g = group()
            .with_volume(Volume::new("v"))
            .with_volume(Volume::new("w"))
            .with_container(
                ContainerSpec::new("a", "img")
                    .with_mount(VolumeMount::new("v", "/m"))
                    .with_mount(VolumeMount::new("w", "/m")),
            );
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::DuplicateMountPath { .. })
        ));
    }

    #[test]
    fn test_same_mount_path_in_different_containers() {
        let g = group()
            .with_volume(Volume::new("v"))
            .with_container(ContainerSpec::new("a", "img").with_mount(VolumeMount::new("v", "/m")))
            .with_container(ContainerSpec::new("b", "img").with_mount(VolumeMount::new("v", "/m")));
        assert!(validate_group(&g).is_ok());
    }

    #[test]
    fn test_env_key_must_be_identifier() {
        let g = group().with_container(ContainerSpec::new("a", "img").with_env("1BAD", "x"));
        assert!(matches!(
            validate_group(&g),
            Err(ValidationError::InvalidEnvKey { .. })
        ));
    }

    #[test]
    fn test_duplicate_env_keys_allowed() {
        let g = group().with_container(
            ContainerSpec::new("a", "img")
                .with_env("KEY", "one")
                .with_env("KEY", "two"),
        );
        assert!(validate_group(&g).is_ok());
    }
}
