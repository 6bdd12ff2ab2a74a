//! Privilege dropping for connection processes.
//!
//! # Responsibilities
//! - Refuse to serve connections as superuser without a target identity
//! - Resolve the configured user and group
//! - Permanently switch a connection process to that identity
//!
//! # Design Decisions
//! - Group is changed before user; once the uid is gone so is the right to change gid
//! - The result is verified afterwards instead of trusting the platform

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{self, Gid, Group, Uid, User};

use crate::config::ServerConfig;

/// Errors raised while checking or changing process identity.
#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    #[error("running as superuser requires both user and group to be configured")]
    SuperuserWithoutRunAs,
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("failed to look up {name:?}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: Errno,
    },
    #[error("failed to change directory to {path:?}: {source}")]
    Chdir {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("failed to {step}: {source}")]
    Change {
        step: &'static str,
        #[source]
        source: Errno,
    },
    #[error("identity change did not stick: uid={uid} euid={euid} gid={gid} egid={egid}")]
    NotPermanent { uid: Uid, euid: Uid, gid: Gid, egid: Gid },
}

/// Check that a process with real uid `uid` may start with `config`.
pub fn verify_startup_identity(uid: Uid, config: &ServerConfig) -> Result<(), PrivilegeError> {
    if uid.is_root() && config.run_as().is_none() {
        return Err(PrivilegeError::SuperuserWithoutRunAs);
    }
    Ok(())
}

/// A resolved target identity.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub uid: Uid,
    pub gid: Gid,
    pub home: PathBuf,
}

impl Credentials {
    /// Look up `group`, then `user`.
    pub fn resolve(user: &str, group: &str) -> Result<Self, PrivilegeError> {
        let group_entry = Group::from_name(group)
            .map_err(|source| PrivilegeError::Lookup {
                name: group.to_string(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::UnknownGroup(group.to_string()))?;

        let user_entry = User::from_name(user)
            .map_err(|source| PrivilegeError::Lookup {
                name: user.to_string(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::UnknownUser(user.to_string()))?;

        Ok(Self {
            user: user_entry.name,
            uid: user_entry.uid,
            gid: group_entry.gid,
            home: user_entry.dir,
        })
    }
}

/// Drop from superuser to `user`/`group`. Does nothing unless running as superuser.
pub fn drop_privileges(
    user: &str,
    group: &str,
    working_directory: Option<&Path>,
) -> Result<(), PrivilegeError> {
    if !Uid::current().is_root() {
        return Ok(());
    }
    let credentials = Credentials::resolve(user, group)?;
    apply(&credentials, working_directory)
}

/// Switch the current process to `credentials`.
pub fn apply(credentials: &Credentials, working_directory: Option<&Path>) -> Result<(), PrivilegeError> {
    if let Err(e) = unistd::chdir(&credentials.home) {
        tracing::warn!(
            home = %credentials.home.display(),
            error = %e,
            "Cannot change to home directory of {}",
            credentials.user
        );
    }
    if let Some(dir) = working_directory {
        unistd::chdir(dir).map_err(|source| PrivilegeError::Chdir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    unistd::setgroups(&[credentials.gid]).map_err(|source| PrivilegeError::Change {
        step: "clear supplementary groups",
        source,
    })?;
    unistd::setgid(credentials.gid).map_err(|source| PrivilegeError::Change {
        step: "set group id",
        source,
    })?;
    unistd::setuid(credentials.uid).map_err(|source| PrivilegeError::Change {
        step: "set user id",
        source,
    })?;

    verify(credentials)?;

    tracing::debug!(
        pid = std::process::id(),
        uid = %credentials.uid,
        gid = %credentials.gid,
        "Dropped privileges"
    );
    Ok(())
}

fn verify(credentials: &Credentials) -> Result<(), PrivilegeError> {
    let (uid, euid) = (Uid::current(), Uid::effective());
    let (gid, egid) = (Gid::current(), Gid::effective());
    let not_permanent = || PrivilegeError::NotPermanent { uid, euid, gid, egid };

    if uid != credentials.uid || euid != credentials.uid {
        return Err(not_permanent());
    }
    if gid != credentials.gid || egid != credentials.gid {
        return Err(not_permanent());
    }
    if !credentials.uid.is_root() && unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(not_permanent());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superuser_needs_run_as() {
        let mut config = ServerConfig::default();
        assert!(matches!(
            verify_startup_identity(Uid::from_raw(0), &config),
            Err(PrivilegeError::SuperuserWithoutRunAs)
        ));

        config.user = Some("mail".into());
        assert!(verify_startup_identity(Uid::from_raw(0), &config).is_err());

        config.group = Some("mail".into());
        assert!(verify_startup_identity(Uid::from_raw(0), &config).is_ok());
    }

    #[test]
    fn unprivileged_start_needs_nothing() {
        let config = ServerConfig::default();
        assert!(verify_startup_identity(Uid::from_raw(1000), &config).is_ok());
    }

    #[test]
    fn unknown_names_fail_resolution() {
        let root_group = Group::from_gid(Gid::from_raw(0)).unwrap().unwrap().name;

        assert!(matches!(
            Credentials::resolve("no-such-user-4f1c", &root_group),
            Err(PrivilegeError::UnknownUser(name)) if name == "no-such-user-4f1c"
        ));
        assert!(matches!(
            Credentials::resolve("root", "no-such-group-4f1c"),
            Err(PrivilegeError::UnknownGroup(name)) if name == "no-such-group-4f1c"
        ));
    }

    #[test]
    fn resolves_existing_identity() {
        let root_group = Group::from_gid(Gid::from_raw(0)).unwrap().unwrap().name;
        let credentials = Credentials::resolve("root", &root_group).unwrap();
        assert!(credentials.uid.is_root());
        assert_eq!(credentials.gid, Gid::from_raw(0));
    }

    #[test]
    fn drop_is_noop_without_superuser() {
        if Uid::current().is_root() {
            return;
        }
        assert!(drop_privileges("no-such-user-4f1c", "no-such-group-4f1c", None).is_ok());
    }
}
