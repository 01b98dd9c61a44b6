/// Mount an LTFS cartridge. This binary only validates the mount options,
/// opens the configured drive, and brings up a [`LtfsVolume`] over it; no
/// FUSE event loop is wired in here -- that collaborator consumes
/// [`LtfsOps`] from outside this crate.
use std::sync::Arc;

use anyhow::{bail, Error};

use proxmox_router::cli::*;
use proxmox_schema::api;

use ltfs::drive_open::open_drive;
use ltfs_core::{LtfsOps, LtfsVolume};

struct MountOptions {
    devname: String,
    scsi_lbprotect: Option<bool>,
    strict_drive: bool,
    noautodump: bool,
}

fn parse_options(options: &str) -> Result<MountOptions, Error> {
    let mut devname = None;
    let mut scsi_lbprotect = None;
    let mut strict_drive = false;
    let mut noautodump = false;

    for opt in options.split(',').filter(|s| !s.is_empty()) {
        match opt.split_once('=') {
            Some(("devname", value)) => devname = Some(value.to_string()),
            Some(("scsi_lbprotect", "on")) => scsi_lbprotect = Some(true),
            Some(("scsi_lbprotect", "off")) => scsi_lbprotect = Some(false),
            Some(("scsi_lbprotect", other)) => {
                bail!("scsi_lbprotect must be 'on' or 'off', got '{other}'")
            }
            None if opt == "strict_drive" => strict_drive = true,
            None if opt == "noautodump" => noautodump = true,
            _ => bail!("unrecognized mount option '{opt}'"),
        }
    }

    let devname = devname.ok_or_else(|| anyhow::anyhow!("mount options must include devname=<drive>"))?;
    Ok(MountOptions {
        devname,
        scsi_lbprotect,
        strict_drive,
        noautodump,
    })
}

#[api(
    input: {
        properties: {
            mountpoint: {
                description: "Directory to mount the volume at.",
                type: String,
            },
            options: {
                description: "Comma-separated mount options: devname=D[,scsi_lbprotect=on|off][,strict_drive][,noautodump].",
                type: String,
            },
        },
    },
)]
/// Open a drive, mount its volume, and report readiness.
fn ltfs(mountpoint: String, options: String) -> Result<(), Error> {
    let opts = parse_options(&options)?;
    if opts.noautodump {
        log::info!("noautodump requested; automatic crash dumps suppressed");
    }

    let dw = Arc::new(open_drive(&opts.devname)?);
    let volume = LtfsVolume::new(dw.clone());
    volume.mount()?;

    if let Some(enable) = opts.scsi_lbprotect {
        dw.set_lbp(enable)?;
    }

    if opts.strict_drive && dw.is_write_protected() {
        bail!("'{}' is write-protected and strict_drive was requested", opts.devname);
    }

    log::info!("mounted '{}' at '{mountpoint}'", opts.devname);
    Ok(())
}

fn main() -> Result<(), Error> {
    init_cli_logger("LTFS_LOG_LEVEL", "info");

    let cmd_def = CliCommand::new(&API_METHOD_LTFS).arg_param(&["mountpoint", "options"]);

    let uid = nix::unistd::Uid::current();
    let username = match nix::unistd::User::from_uid(uid)? {
        Some(user) => user.name,
        None => bail!("unable to get user name"),
    };

    let mut rpcenv = CliEnvironment::new();
    rpcenv.set_auth_id(Some(format!("{username}@pam")));
    run_cli_command(cmd_def, rpcenv, None);

    Ok(())
}
