use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use fn_error_context::context;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::client::ImdsClient;

const INSTANCE_ID_PATH: &str = "/meta-data/instance-id/";
const AVAILABILITY_ZONE_PATH: &str = "/meta-data/placement/availability-zone/";
const SERVICE_DOMAIN_PATH: &str = "/meta-data/services/domain/";

static INSTANCE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^i-[0-9a-f]{8,32}$").expect("instance id regex"));
static AVAILABILITY_ZONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+-){2,3}[0-9][a-z]$").expect("availability zone regex"));

/// Identity of the local instance as resolved from the metadata service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub availability_zone: String,
    pub region: String,
    pub domain: String,
}

/// Filesystem locations of the hypervisor evidence. Production code uses
/// [`HostProbe::default`]; tests substitute temp files.
#[derive(Debug, Clone)]
pub struct HostProbe {
    pub hypervisor_uuid: PathBuf,
    pub board_asset_tag: PathBuf,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self {
            hypervisor_uuid: PathBuf::from("/sys/hypervisor/uuid"),
            board_asset_tag: PathBuf::from("/sys/devices/virtual/dmi/id/board_asset_tag"),
        }
    }
}

impl HostProbe {
    /// Whether the kernel-exposed hypervisor evidence matches the claimed
    /// instance id. The hypervisor UUID takes priority; the DMI board asset
    /// tag is the fallback on HVM instances that do not expose it.
    pub fn confirms(&self, instance_id: &str) -> bool {
        if let Ok(uuid) = fs::read_to_string(&self.hypervisor_uuid) {
            return uuid.starts_with("ec2");
        }
        if let Ok(tag) = fs::read_to_string(&self.board_asset_tag) {
            return tag.trim() == instance_id;
        }
        debug!("neither hypervisor uuid nor board asset tag is readable");
        false
    }
}

pub fn is_valid_instance_id(value: &str) -> bool {
    INSTANCE_ID_RE.is_match(value)
}

/// Region of an availability zone: the zone name minus its trailing zone
/// letter, with anything after a path separator dropped first.
pub fn region_of_zone(zone: &str) -> anyhow::Result<String> {
    let zone = zone.split('/').next().unwrap_or(zone);
    anyhow::ensure!(
        AVAILABILITY_ZONE_RE.is_match(zone),
        "Availability zone {zone:?} does not look like a zone name"
    );
    Ok(zone[..zone.len() - 1].to_string())
}

/// Decide whether the local host is a genuine instance and resolve its
/// identity. `Ok(None)` means "not an instance": the metadata service did
/// not hand out a well-formed instance id, or the hypervisor evidence does
/// not back it up. Failures after that gate are real errors.
#[context("Error resolving the instance identity")]
pub async fn resolve_identity(
    imds: &ImdsClient,
    probe: &HostProbe,
) -> anyhow::Result<Option<InstanceIdentity>> {
    let instance_id = match imds.fetch_string(INSTANCE_ID_PATH).await {
        Ok(Some(id)) => id.trim().to_string(),
        Ok(None) | Err(_) => {
            info!("metadata service did not return an instance id");
            return Ok(None);
        }
    };

    if !is_valid_instance_id(&instance_id) {
        info!("metadata service returned a malformed instance id");
        return Ok(None);
    }

    if !probe.confirms(&instance_id) {
        info!("hypervisor evidence does not match instance id {instance_id}");
        return Ok(None);
    }

    let availability_zone = imds
        .fetch_string(AVAILABILITY_ZONE_PATH)
        .await?
        .context("Metadata service has no availability zone")?
        .trim()
        .to_string();
    let region = region_of_zone(&availability_zone)?;

    let domain = imds
        .fetch_string(SERVICE_DOMAIN_PATH)
        .await?
        .context("Metadata service has no service domain")?
        .trim()
        .to_string();

    Ok(Some(InstanceIdentity {
        instance_id,
        availability_zone,
        region,
        domain,
    }))
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn instance_id_format() {
        assert!(is_valid_instance_id("i-0123456789abcdef0"));
        assert!(is_valid_instance_id("i-12345678"));
        assert!(!is_valid_instance_id("i-1234567"));
        assert!(!is_valid_instance_id("i-0123456789ABCDEF0"));
        assert!(!is_valid_instance_id("x-0123456789abcdef0"));
        assert!(!is_valid_instance_id("i-0123456789abcdef0\n"));
        assert!(!is_valid_instance_id(""));
    }

    #[test]
    fn region_from_zone() -> anyhow::Result<()> {
        assert_eq!(region_of_zone("us-east-1a")?, "us-east-1");
        assert_eq!(region_of_zone("ap-southeast-2c")?, "ap-southeast-2");
        assert_eq!(region_of_zone("us-gov-west-1b")?, "us-gov-west-1");
        assert_eq!(region_of_zone("eu-central-1a/")?, "eu-central-1");
        assert!(region_of_zone("us-east-1").is_err());
        assert!(region_of_zone("useast1a").is_err());
        assert!(region_of_zone("").is_err());
        Ok(())
    }

    #[test]
    fn probe_prefers_hypervisor_uuid() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let uuid_path = dir.path().join("uuid");
        let tag_path = dir.path().join("board_asset_tag");
        fs::write(&uuid_path, "ec2e1916-9099-7caf-fd21-012345abcdef\n")?;

        let probe = HostProbe {
            hypervisor_uuid: uuid_path.clone(),
            board_asset_tag: tag_path.clone(),
        };
        assert!(probe.confirms("i-0123456789abcdef0"));

        // A non-ec2 uuid must not fall through to the asset tag.
        fs::write(&uuid_path, "deadbeef-9099-7caf-fd21-012345abcdef\n")?;
        fs::write(&tag_path, "i-0123456789abcdef0\n")?;
        assert!(!probe.confirms("i-0123456789abcdef0"));
        Ok(())
    }

    #[test]
    fn probe_falls_back_to_asset_tag() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let probe = HostProbe {
            hypervisor_uuid: dir.path().join("missing-uuid"),
            board_asset_tag: dir.path().join("board_asset_tag"),
        };

        // Neither source readable: not an instance.
        assert!(!probe.confirms("i-0123456789abcdef0"));

        fs::write(&probe.board_asset_tag, "i-0123456789abcdef0\n")?;
        assert!(probe.confirms("i-0123456789abcdef0"));
        assert!(!probe.confirms("i-ffffffffffffffff0"));
        Ok(())
    }
}
