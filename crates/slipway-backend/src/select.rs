//! Engine selection and construction.
//!
//! The platform descriptor decides which engine runs, in strict precedence
//! order: declared build hosts beat a machine image, which beats a container
//! image, which beats an explicit target address, which beats the built-in
//! default. The first three tiers come from the descriptor; the target tier
//! exists so an operator can point a build at an arbitrary host without
//! editing platform files.

use slipway_config::Platform;

use crate::error::BackendError;
use crate::remote::login_target;
use crate::{
    Backend, BackendKind, BaseBackend, CloudBackend, ContainerBackend, HardwareBackend,
    LocalBackend,
};

/// Decide which engine kind a build on this platform uses.
#[must_use]
pub fn select_kind(platform: &Platform, target: Option<&str>, default: BackendKind) -> BackendKind {
    if !platform.backend.build_hosts.is_empty() {
        BackendKind::Hardware
    } else if platform.backend.ami.is_some() {
        BackendKind::Cloud
    } else if platform.backend.image.is_some() {
        BackendKind::Container
    } else if target.is_some() {
        BackendKind::Base
    } else {
        default
    }
}

/// Construct the chosen engine, checking its prerequisites first.
///
/// # Errors
///
/// Returns [`BackendError::MissingRequirement`] when the platform descriptor
/// lacks what the kind needs: a build host for `hardware`, an `ami` for
/// `cloud`, an `image` for `container`, or a target address for `base`.
pub fn instantiate(
    kind: BackendKind,
    platform: &Platform,
    target: Option<&str>,
) -> Result<Box<dyn Backend>, BackendError> {
    match kind {
        BackendKind::Local => Ok(Box::new(LocalBackend::new())),
        BackendKind::Base => {
            let Some(target) = target else {
                return Err(BackendError::MissingRequirement {
                    kind: "base",
                    requirement: "a target address",
                });
            };
            Ok(Box::new(BaseBackend::new(&login_target(
                &platform.backend.user,
                target,
            ))))
        }
        BackendKind::Hardware => {
            // An explicit target overrides the pool; otherwise the first
            // declared host is taken.
            let host = target
                .map(ToOwned::to_owned)
                .or_else(|| platform.backend.build_hosts.first().cloned());
            let Some(host) = host else {
                return Err(BackendError::MissingRequirement {
                    kind: "hardware",
                    requirement: "a declared build host or a target address",
                });
            };
            Ok(Box::new(HardwareBackend::new(&login_target(
                &platform.backend.user,
                &host,
            ))))
        }
        BackendKind::Cloud => {
            let Some(ami) = platform.backend.ami.as_deref() else {
                return Err(BackendError::MissingRequirement {
                    kind: "cloud",
                    requirement: "a machine image (ami)",
                });
            };
            Ok(Box::new(CloudBackend::new(ami, &platform.backend.user)))
        }
        BackendKind::Container => {
            let Some(image) = platform.backend.image.as_deref() else {
                return Err(BackendError::MissingRequirement {
                    kind: "container",
                    requirement: "a container image",
                });
            };
            Ok(Box::new(ContainerBackend::new(image)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use slipway_config::platform::{BackendSpec, PlatformInfo};
    use slipway_config::Platform;

    fn platform_with(hosts: bool, ami: bool, image: bool) -> Platform {
        Platform {
            platform: PlatformInfo {
                name: "testos".to_owned(),
                build_command: "make".to_owned(),
            },
            install: None,
            backend: BackendSpec {
                build_hosts: if hosts {
                    vec!["forge-01".to_owned(), "forge-02".to_owned()]
                } else {
                    Vec::new()
                },
                ami: ami.then(|| "ami-0abc".to_owned()),
                image: image.then(|| "testos-build:1".to_owned()),
                user: "root".to_owned(),
            },
        }
    }

    #[test]
    fn precedence_holds_for_every_combination() {
        for hosts in [false, true] {
            for ami in [false, true] {
                for image in [false, true] {
                    for target in [None, Some("buildhost")] {
                        let platform = platform_with(hosts, ami, image);
                        let expected = if hosts {
                            BackendKind::Hardware
                        } else if ami {
                            BackendKind::Cloud
                        } else if image {
                            BackendKind::Container
                        } else if target.is_some() {
                            BackendKind::Base
                        } else {
                            BackendKind::Local
                        };
                        assert_eq!(
                            select_kind(&platform, target, BackendKind::Local),
                            expected,
                            "hosts={hosts} ami={ami} image={image} target={target:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn build_hosts_beat_everything() {
        let platform = platform_with(true, true, true);
        let kind = select_kind(&platform, Some("elsewhere"), BackendKind::Local);
        assert_eq!(kind, BackendKind::Hardware);
    }

    #[test]
    fn bare_descriptor_falls_through_to_the_default() {
        let platform = platform_with(false, false, false);
        assert_eq!(select_kind(&platform, None, BackendKind::Local), BackendKind::Local);
        assert_eq!(
            select_kind(&platform, None, BackendKind::Container),
            BackendKind::Container
        );
    }

    #[test]
    fn target_without_descriptor_backends_means_base() {
        let platform = platform_with(false, false, false);
        assert_eq!(
            select_kind(&platform, Some("buildhost"), BackendKind::Local),
            BackendKind::Base
        );
    }

    #[test]
    fn hardware_takes_the_first_declared_host() {
        let platform = platform_with(true, false, false);
        let backend = instantiate(BackendKind::Hardware, &platform, None).unwrap();
        assert_eq!(backend.target(), "root@forge-01");
        assert_eq!(backend.kind(), BackendKind::Hardware);
    }

    #[test]
    fn explicit_target_overrides_the_pool() {
        let platform = platform_with(true, false, false);
        let backend = instantiate(BackendKind::Hardware, &platform, Some("forge-09")).unwrap();
        assert_eq!(backend.target(), "root@forge-09");
    }

    #[test]
    fn hardware_without_hosts_or_target_is_rejected() {
        let platform = platform_with(false, false, false);
        let err = instantiate(BackendKind::Hardware, &platform, None).unwrap_err();
        assert!(matches!(
            err,
            BackendError::MissingRequirement { kind: "hardware", .. }
        ));
    }

    #[test]
    fn cloud_without_an_ami_is_rejected() {
        let platform = platform_with(false, false, false);
        let err = instantiate(BackendKind::Cloud, &platform, None).unwrap_err();
        assert!(matches!(err, BackendError::MissingRequirement { kind: "cloud", .. }));
    }

    #[test]
    fn container_without_an_image_is_rejected() {
        let platform = platform_with(false, false, false);
        let err = instantiate(BackendKind::Container, &platform, None).unwrap_err();
        assert!(matches!(
            err,
            BackendError::MissingRequirement { kind: "container", .. }
        ));
    }

    #[test]
    fn base_without_a_target_is_rejected() {
        let platform = platform_with(false, false, false);
        let err = instantiate(BackendKind::Base, &platform, None).unwrap_err();
        assert!(matches!(err, BackendError::MissingRequirement { kind: "base", .. }));
    }

    #[test]
    fn base_gets_the_platform_login_user() {
        let platform = platform_with(false, false, false);
        let backend = instantiate(BackendKind::Base, &platform, Some("buildhost")).unwrap();
        assert_eq!(backend.target(), "root@buildhost");
    }

    #[test]
    fn cloud_is_built_from_the_descriptor_image() {
        let platform = platform_with(false, true, false);
        let backend = instantiate(BackendKind::Cloud, &platform, None).unwrap();
        assert_eq!(backend.target(), "ami-0abc");
        assert_eq!(backend.kind(), BackendKind::Cloud);
    }

    #[test]
    fn container_is_built_from_the_descriptor_image() {
        let platform = platform_with(false, false, true);
        let backend = instantiate(BackendKind::Container, &platform, None).unwrap();
        assert_eq!(backend.target(), "testos-build:1");
    }

    #[test]
    fn local_needs_nothing() {
        let platform = platform_with(false, false, false);
        let backend = instantiate(BackendKind::Local, &platform, None).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
    }
}
