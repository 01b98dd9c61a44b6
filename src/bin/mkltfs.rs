/// Format an LTFS cartridge: writes fresh ANSI+LTFS labels and an empty
/// index on both partitions.
use anyhow::Error;

use proxmox_router::cli::*;
use proxmox_schema::api;

use ltfs::drive_open::open_drive;
use ltfs_api_types::{DRIVE_NAME_SCHEMA, INDEX_PARTITION, DATA_PARTITION};

#[api(
    input: {
        properties: {
            device: {
                schema: DRIVE_NAME_SCHEMA,
            },
            barcode: {
                description: "Six-character volume barcode.",
                type: String,
            },
            "index-partition": {
                description: "Which physical partition holds the index ('a' or 'b').",
                type: String,
                optional: true,
                default: "a",
            },
            compression: {
                description: "Enable drive compression.",
                type: bool,
                optional: true,
                default: false,
            },
        },
    },
)]
/// Format a cartridge as a fresh, empty LTFS volume.
fn mkltfs(
    device: String,
    barcode: String,
    index_partition: String,
    compression: bool,
) -> Result<(), Error> {
    let dw = open_drive(&device)?;

    let index_part = match index_partition.as_str() {
        "a" => INDEX_PARTITION,
        "b" => DATA_PARTITION,
        other => anyhow::bail!("index-partition must be 'a' or 'b', got '{other}'"),
    };

    dw.format(index_part, &barcode, &barcode)?;
    dw.load_tape([0, 0])?;

    log::info!("formatted '{device}' as LTFS volume '{barcode}'");
    if compression {
        log::info!("compression requested; drive-level compression is negotiated on mount");
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    init_cli_logger("LTFS_LOG_LEVEL", "info");

    let cmd_def = CliCommand::new(&API_METHOD_MKLTFS).arg_param(&["device", "barcode"]);

    let uid = nix::unistd::Uid::current();
    let username = match nix::unistd::User::from_uid(uid)? {
        Some(user) => user.name,
        None => anyhow::bail!("unable to get user name"),
    };

    let mut rpcenv = CliEnvironment::new();
    rpcenv.set_auth_id(Some(format!("{username}@pam")));
    run_cli_command(cmd_def, rpcenv, None);

    Ok(())
}
