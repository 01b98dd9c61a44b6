/// Check (and optionally repair) the coherency of an LTFS cartridge: reads
/// both partitions' coherency MAM pages, resolves which one is
/// authoritative, and recovers the end-of-data position when asked.
use anyhow::Error;

use proxmox_router::cli::*;
use proxmox_schema::api;

use ltfs::drive_open::open_drive;
use ltfs_api_types::{DRIVE_NAME_SCHEMA, DATA_PARTITION, INDEX_PARTITION};
use ltfs_core::label::{read_coherency, resolve_authoritative};

#[api(
    input: {
        properties: {
            device: {
                schema: DRIVE_NAME_SCHEMA,
            },
            recover: {
                description: "Reposition to end-of-data on both partitions before checking.",
                type: bool,
                optional: true,
                default: false,
            },
            deep: {
                description: "Also report each partition's remaining capacity and space state.",
                type: bool,
                optional: true,
                default: false,
            },
        },
    },
)]
/// Verify that a cartridge's index and data partitions are coherent.
fn ltfsck(device: String, recover: bool, deep: bool) -> Result<(), Error> {
    let dw = open_drive(&device)?;
    dw.load_tape([0, 0])?;

    if recover {
        let not_cancelled = || false;
        dw.recover_eod_status(INDEX_PARTITION, &not_cancelled)?;
        dw.recover_eod_status(DATA_PARTITION, &not_cancelled)?;
        log::info!("recovered end-of-data position on both partitions");
    }

    let index_coherency = read_coherency(&dw, INDEX_PARTITION)?;
    let data_coherency = read_coherency(&dw, DATA_PARTITION)?;
    let authoritative = resolve_authoritative(&index_coherency, &data_coherency)?;

    log::info!(
        "'{device}': index partition generation {}, data partition generation {}, authoritative partition is {authoritative}",
        index_coherency.count,
        data_coherency.count,
    );

    if deep {
        for (name, part) in [("index", INDEX_PARTITION), ("data", DATA_PARTITION)] {
            let info = dw.partition_info(part);
            log::info!(
                "'{device}': {name} partition: {:?}, {} MiB remaining of {} MiB",
                info.space_state,
                info.remaining_mib,
                info.max_mib,
            );
        }
    }

    Ok(())
}

fn main() -> Result<(), Error> {
    init_cli_logger("LTFS_LOG_LEVEL", "info");

    let cmd_def = CliCommand::new(&API_METHOD_LTFSCK).arg_param(&["device"]);

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
