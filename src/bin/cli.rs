use clap::{App, Arg, SubCommand};
use shmfabric::{
    count_marker, normalize_region_size, Coordinator, HandshakeServer, PeerRole, RegionConfig,
    RegionLayout, Result, SharedMemoryRegion, SyncMode, Worker,
};
use std::{path::PathBuf, time::Instant};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("shmfabric-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Shared-memory work-distribution fabric")
        .subcommand(
            SubCommand::with_name("coordinator")
                .about("Create the region, serve the handshake, drive work cycles")
                .arg(
                    Arg::with_name("region_file")
                        .short("r")
                        .long("region-file")
                        .value_name("PATH")
                        .help("Backing file for the shared region")
                        .default_value("/dev/shm/shmfabric")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("socket")
                        .short("k")
                        .long("socket")
                        .value_name("PATH")
                        .help("Control channel socket path")
                        .default_value("/tmp/shmfabric.sock")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("SIZE")
                        .help("Region size, with optional k/m/g suffix")
                        .default_value("512m")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("clients")
                        .short("c")
                        .long("clients")
                        .value_name("COUNT")
                        .help("Number of fabric members (power of two, max 64)")
                        .default_value("8")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("cycles")
                        .short("n")
                        .long("cycles")
                        .value_name("COUNT")
                        .help("Number of work cycles to run")
                        .default_value("1")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("mode")
                        .short("m")
                        .long("mode")
                        .value_name("MODE")
                        .help("Sync discipline: polling or doorbell")
                        .default_value("polling")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("fill")
                        .short("f")
                        .long("fill")
                        .value_name("BYTE")
                        .help("Byte the work buffer is filled with")
                        .default_value("S")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("worker")
                .about("Join the fabric and compute over the assigned slice")
                .arg(
                    Arg::with_name("region_file")
                        .short("r")
                        .long("region-file")
                        .value_name("PATH")
                        .help("Backing file for the shared region")
                        .default_value("/dev/shm/shmfabric")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("socket")
                        .short("k")
                        .long("socket")
                        .value_name("PATH")
                        .help("Control channel socket path")
                        .default_value("/tmp/shmfabric.sock")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("index")
                        .short("i")
                        .long("index")
                        .value_name("INDEX")
                        .help("Worker index in [1, clients)")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("mode")
                        .short("m")
                        .long("mode")
                        .value_name("MODE")
                        .help("Sync discipline: polling or doorbell")
                        .default_value("polling")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("marker")
                        .long("marker")
                        .value_name("BYTE")
                        .help("Marker byte the work function counts")
                        .default_value("S")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("peek")
                        .long("peek")
                        .value_name("INDEX")
                        .help("Also map a read view of this peer's slice")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("layout")
                .about("Print the slice geometry derived from size and clients")
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("SIZE")
                        .help("Region size, with optional k/m/g suffix")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("clients")
                        .short("c")
                        .long("clients")
                        .value_name("COUNT")
                        .help("Number of fabric members")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .subcommand(SubCommand::with_name("info").about("Show version and capabilities"))
        .get_matches();

    match matches.subcommand() {
        ("coordinator", Some(sub)) => run_coordinator(sub),
        ("worker", Some(sub)) => run_worker(sub),
        ("layout", Some(sub)) => show_layout(sub),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn run_coordinator(matches: &clap::ArgMatches) -> Result<()> {
    let region_file = PathBuf::from(matches.value_of("region_file").unwrap());
    let socket = PathBuf::from(matches.value_of("socket").unwrap());
    let size = normalize_region_size(parse_size(matches.value_of("size").unwrap())?);
    let clients: u32 = parse_number(matches.value_of("clients").unwrap(), "clients")?;
    let cycles: u32 = parse_number(matches.value_of("cycles").unwrap(), "cycles")?;
    let mode: SyncMode = matches.value_of("mode").unwrap().parse()?;
    let fill = parse_byte(matches.value_of("fill").unwrap(), "fill")?;

    let layout = RegionLayout::compute(size, clients)?;
    println!(
        "Region: {} bytes, {} clients, slice {} bytes, mode {}",
        layout.total_size(),
        layout.client_count(),
        layout.slice_size(),
        mode
    );

    let region = SharedMemoryRegion::new(
        RegionConfig::new("shmfabric", layout.total_size()).with_file_path(&region_file),
    )?;

    let mut server = HandshakeServer::bind(&socket, layout)?;
    println!("Waiting for {} workers on {:?}", clients - 1, socket);
    server.serve(clients - 1)?;
    let registry = server.into_registry();

    let mut coordinator = Coordinator::new(region, layout, registry, mode)?;
    let buf = vec![fill; layout.slice_size()];

    let start = Instant::now();
    let results = coordinator.run_cycles(cycles, &buf)?;
    let elapsed = start.elapsed();

    for (cycle, cycle_results) in results.iter().enumerate() {
        println!("cycle {}: {:?}", cycle, cycle_results);
    }
    println!(
        "{} cycles in {} ms",
        results.len(),
        elapsed.as_millis()
    );

    coordinator.shutdown()
}

fn run_worker(matches: &clap::ArgMatches) -> Result<()> {
    let region_file = PathBuf::from(matches.value_of("region_file").unwrap());
    let socket = PathBuf::from(matches.value_of("socket").unwrap());
    let index: u32 = parse_number(matches.value_of("index").unwrap(), "index")?;
    let mode: SyncMode = matches.value_of("mode").unwrap().parse()?;
    let marker = parse_byte(matches.value_of("marker").unwrap(), "marker")?;
    let peek = match matches.value_of("peek") {
        Some(raw) => Some(parse_number(raw, "peek")?),
        None => None,
    };

    let handle = PeerRole::new(index)?.join(&socket, &region_file, peek)?;
    println!(
        "Worker {} joined: slice {} bytes at offset {:#x}",
        handle.index(),
        handle.layout().slice_size(),
        handle.layout().slice_offset(handle.index())
    );

    let mut worker = Worker::new(handle, mode, count_marker(marker));
    let exit = worker.run()?;
    println!("Worker {} exited: {:?}", index, exit);
    Ok(())
}

fn show_layout(matches: &clap::ArgMatches) -> Result<()> {
    let size = parse_size(matches.value_of("size").unwrap())?;
    let clients: u32 = parse_number(matches.value_of("clients").unwrap(), "clients")?;

    let layout = RegionLayout::compute(size, clients)?;
    println!("Total size:  {} bytes", layout.total_size());
    println!("Clients:     {}", layout.client_count());
    println!("Slice size:  {} bytes", layout.slice_size());
    for index in 0..layout.client_count() {
        let role = if index == 0 { "coordinator" } else { "worker" };
        println!(
            "  slice {:>2} at {:#010x}  ({})",
            index,
            layout.slice_offset(index),
            role
        );
    }
    Ok(())
}

fn show_info() -> Result<()> {
    println!("Shmfabric");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));

    println!("\nCapabilities:");
    println!("  - Reproducible region slicing (pure derivation on every peer)");
    println!("  - Unix socket handshake with eventfd passing");
    println!("  - Polling and doorbell synchronization disciplines");
    println!("  - File-backed and memfd region backing");
    Ok(())
}

/// Parse a size string with optional k/m/g suffix
fn parse_size(raw: &str) -> Result<usize> {
    let raw = raw.trim();
    let (digits, multiple) = match raw.char_indices().find(|(_, c)| c.is_alphabetic()) {
        Some((pos, 'k')) | Some((pos, 'K')) => (&raw[..pos], 1usize << 10),
        Some((pos, 'm')) | Some((pos, 'M')) => (&raw[..pos], 1usize << 20),
        Some((pos, 'g')) | Some((pos, 'G')) => (&raw[..pos], 1usize << 30),
        Some(_) => {
            return Err(shmfabric::FabricError::invalid_parameter(
                "size",
                "unknown size suffix, expected k, m or g",
            ))
        }
        None => (raw, 1usize),
    };
    let value: usize = digits.parse().map_err(|_| {
        shmfabric::FabricError::invalid_parameter("size", "invalid size format")
    })?;
    Ok(value * multiple)
}

fn parse_number<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        shmfabric::FabricError::invalid_parameter(name, format!("invalid value '{}'", raw))
    })
}

fn parse_byte(raw: &str, name: &str) -> Result<u8> {
    let bytes = raw.as_bytes();
    if bytes.len() != 1 {
        return Err(shmfabric::FabricError::invalid_parameter(
            name,
            "expected a single byte",
        ));
    }
    Ok(bytes[0])
}
