//! Harvest of the local SSH host public keys.

use std::fs;
use std::path::Path;

use anyhow::Context;
use log::{debug, warn};

/// Every readable `*.pub` under `dir`, in lexicographic filename order,
/// with internal whitespace collapsed to single spaces. Unreadable files
/// are skipped; the daemon owns some private material in the same
/// directory and permissions vary across distributions.
pub fn collect_host_keys(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Error listing the host key directory {dir:?}"))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "pub"))
        .collect();
    paths.sort();

    let mut keys = Vec::new();
    for path in paths {
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let collapsed = contents.split_whitespace().collect::<Vec<_>>().join(" ");
                if collapsed.is_empty() {
                    warn!("host key file {path:?} is empty");
                } else {
                    debug!("harvested host key {path:?}");
                    keys.push(collapsed);
                }
            }
            Err(err) => warn!("skipping unreadable host key file {path:?}: {err}"),
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn harvests_in_filename_order_with_collapsed_whitespace() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("ssh_host_rsa_key.pub"),
            "ssh-rsa  AAAAB3Nza   root@host\n",
        )?;
        fs::write(
            dir.path().join("ssh_host_ed25519_key.pub"),
            "ssh-ed25519 AAAAC3Nza root@host\n",
        )?;
        fs::write(dir.path().join("ssh_host_rsa_key"), "PRIVATE KEY\n")?;
        fs::write(dir.path().join("moduli"), "# moduli\n")?;

        let keys = collect_host_keys(dir.path())?;
        assert_eq!(
            keys,
            vec![
                "ssh-ed25519 AAAAC3Nza root@host".to_string(),
                "ssh-rsa AAAAB3Nza root@host".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_pub_files_are_dropped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("stale.pub"), "\n")?;
        assert!(collect_host_keys(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(collect_host_keys(Path::new("/nonexistent-host-keys")).is_err());
    }
}
