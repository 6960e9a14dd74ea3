//! Enumerate a simulated FireWire bus
//!
//! Builds a small bus (camera, disk, hub), reloads it and prints roles,
//! nodes and speeds, then runs one request through a loopback channel.
//!
//! ```text
//! RUST_LOG=firewire_driver=debug cargo run --example enumerate_bus
//! ```

use anyhow::{Context, Result};
use firewire_driver::csr::{BusOptions, NodeId, PortState, Speed};
use firewire_driver::isoch::{IsochRequest, LoopbackChannel, RequestStatus};
use firewire_driver::{
    backends::self_id, BusController, Channel, GeneralRom, ReloadConfig, Role, SimulatedBus,
    SimulatedNode,
};
use tracing_subscriber::EnvFilter;

fn build_bus() -> SimulatedBus {
    let bus = SimulatedBus::new();

    let host = GeneralRom::new(0x0011_0600_0000_0001, 0x00_1106, BusOptions::new().with_link_spd(2))
        .with_description("host adapter");
    bus.add_node(SimulatedNode::new().with_general_rom(&host));

    let camera = GeneralRom::new(
        0x0080_8800_0000_0002,
        0x00_8088,
        BusOptions::new().with_isc(true).with_link_spd(1).with_max_rec(9),
    )
    .with_description("DV camcorder")
    .with_keywords(["camera", "dv"]);
    bus.add_node(SimulatedNode::new().with_general_rom(&camera));

    let self_ids = [
        self_id(0, Speed::S400, true, &[PortState::Parent]),
        self_id(1, Speed::S200, false, &[PortState::Parent]),
        self_id(2, Speed::S400, true, &[PortState::Child, PortState::Child]),
    ]
    .concat();
    let speeds = |from: u8, to: u8| {
        if from == 1 || to == 1 || to == 63 {
            Speed::S200
        } else {
            Speed::S400
        }
    };

    let hub = GeneralRom::new(
        0x0000_0300_0000_0003,
        0x00_0003,
        BusOptions::new()
            .with_irmc(true)
            .with_cmc(true)
            .with_isc(true)
            .with_bmc(true)
            .with_link_spd(2),
    )
    .with_description("repeater hub");
    bus.add_node(
        SimulatedNode::new()
            .with_general_rom(&hub)
            .with_cycle_timer(0, 0)
            .with_cycle_master_enabled()
            .with_bus_manager_id(2)
            .with_irm_resources(4915, 0xffff_ffff_ffff_fffe)
            .with_topology_map(1, &self_ids)
            .with_speed_map(1, speeds),
    );
    bus
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let controller = BusController::with_config(build_bus(), ReloadConfig::from_env())
        .context("opening simulated adapter")?;
    controller.reload().context("reloading bus")?;

    println!("FireWire bus, generation {:?}", controller.reset_generation());
    for role in [
        Role::Root,
        Role::IsochronousResourceManager,
        Role::BusManager,
        Role::CycleMaster,
    ] {
        println!("  {role}: {}", controller.snapshot().role(role));
    }
    println!(
        "  bandwidth {} units, channels {:#018x}",
        controller.available_bandwidth()?,
        controller.available_isochronous_channels()?
    );

    println!();
    for (node, guid) in controller.nodes() {
        let rom = controller.rom(node);
        println!(
            "{node}  guid {:016x}  phy {}  link {}  {}",
            guid.unwrap_or_default(),
            controller.maximum_speed(node).unwrap_or_default(),
            controller
                .maximum_link_speed(node)
                .map_or_else(|| "?".to_string(), |s| s.to_string()),
            rom.description()?.unwrap_or_default(),
        );
        println!(
            "    vendor {:06x}  {}  caps {}",
            rom.vendor_id()?,
            rom.compliance(),
            rom.capabilities()
        );
    }

    let local = controller.local_id();
    println!();
    println!("broadcast speed {}", controller.broadcast_speed()?);
    println!(
        "speed to camera {}",
        controller.maximum_speed_between(local, NodeId::local(1))?
    );

    let mut channel = Channel::new();
    let loopback = LoopbackChannel::new(1);
    channel.open(loopback.clone());
    let request = channel.create_read_packets_request()?;
    channel.queue(request.clone())?;
    loopback.complete_next(RequestStatus::Completed, 8, 3840)?;
    channel.wait(1_000)?;
    println!(
        "\nloopback read: {:?}, {} packets, {} bytes",
        request.status(),
        request.transferred_packets(),
        request.transferred_bytes()
    );
    Ok(())
}
