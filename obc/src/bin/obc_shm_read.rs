//! Print the platform status segments of a running OBC daemon.
//!
//! Attaches to the segments the daemon created; nothing is initialised or
//! destroyed.
//!
//! ```bash
//! obc_shm_read --config-dir /etc/obc
//! obc_shm_read --json | jq '.failsafe'
//! ```

use bytemuck::Pod;
use clap::Parser;
use obc::failsafe::read_fail_level;
use obc_common::consts::{
    DEFAULT_CONFIG_DIR, FAILSAFE_SEGMENT, MEMORY_CONFIG_FILE, PROC_STAT_SEGMENT,
    RESOURCE_STAT_SEGMENT,
};
use obc_common::failsafe::FailCode;
use obc_common::records::{ProcStatRecord, ResourceStatRecord};
use obc_shared_memory::{SegmentKind, SegmentRegistry, ShmResult};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "obc_shm_read")]
#[command(version)]
#[command(about = "Dump OBC process, resource and failsafe segments")]
struct Args {
    /// Directory holding memory.toml
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Print one JSON document instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ProcessView {
    stat: i32,
    cpu: f32,
    mem: f32,
}

#[derive(Serialize)]
struct FailView {
    code: u32,
    name: String,
    level: String,
}

#[derive(Serialize, Default)]
struct Snapshot {
    processes: Option<Vec<ProcessView>>,
    resources: Option<ResourceView>,
    failsafe: Vec<FailView>,
}

#[derive(Serialize)]
struct ResourceView {
    cpu_load: Vec<i32>,
    mem_load: i32,
    disk_load: i32,
    cpu_therm: i32,
}

fn read<T: Pod>(registry: &SegmentRegistry, name: &str) -> ShmResult<T> {
    registry.session(name, SegmentKind::Platform)?.read_record()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    obc_shared_memory::init_tracing();

    let registry = SegmentRegistry::new();
    registry.configure_from_file(&args.config_dir.join(MEMORY_CONFIG_FILE))?;

    let mut snapshot = Snapshot::default();

    match read::<ProcStatRecord>(&registry, PROC_STAT_SEGMENT) {
        Ok(record) => {
            let n = usize::try_from(record.num).unwrap_or(0).min(record.stat.len());
            snapshot.processes = Some(
                (0..n)
                    .map(|i| ProcessView {
                        stat: record.stat[i],
                        cpu: record.cpu[i],
                        mem: record.mem[i],
                    })
                    .collect(),
            );
        }
        Err(e) => eprintln!("{PROC_STAT_SEGMENT}: {e}"),
    }

    match read::<ResourceStatRecord>(&registry, RESOURCE_STAT_SEGMENT) {
        Ok(record) => {
            snapshot.resources = Some(ResourceView {
                cpu_load: record.cpu_load.to_vec(),
                mem_load: record.mem_load,
                disk_load: record.disk_load,
                cpu_therm: record.cpu_therm,
            });
        }
        Err(e) => eprintln!("{RESOURCE_STAT_SEGMENT}: {e}"),
    }

    for code in FailCode::ALL {
        let level = match read_fail_level(&registry, FAILSAFE_SEGMENT, code.code()) {
            Ok(level) => level.to_string(),
            Err(e) => format!("error: {e}"),
        };
        snapshot.failsafe.push(FailView {
            code: code.code(),
            name: format!("{code:?}"),
            level,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_text(&snapshot);
    }
    Ok(())
}

fn print_text(snapshot: &Snapshot) {
    if let Some(processes) = &snapshot.processes {
        println!("proc num = {}", processes.len());
        for (i, p) in processes.iter().enumerate() {
            println!("proc[{i}] stat = {} cpu = {:.1}% mem = {:.1}%", p.stat, p.cpu, p.mem);
        }
        println!();
    }

    if let Some(res) = &snapshot.resources {
        for (i, load) in res.cpu_load.iter().enumerate() {
            println!("cpu_load[{i}] = {load}");
        }
        println!("mem_load = {}", res.mem_load);
        println!("disk_load = {}", res.disk_load);
        println!("cpu_therm = {}", res.cpu_therm);
        println!();
    }

    for f in &snapshot.failsafe {
        println!("ErrorCode = {:2} ({}) : fail level = {}", f.code, f.name, f.level);
    }
}
