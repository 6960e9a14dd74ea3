//! Shared simulated bus fixtures
//!
//! ```text
//!            3 (root, IRM)
//!            │
//!            2 (bus manager, holds the maps)
//!          ┌─┴─┐
//!          0   1 (cycle master)
//!       (local)
//! ```

#![allow(dead_code)]

use firewire_driver::csr::{BusOptions, PortState, Speed};
use firewire_driver::{
    backends::self_id, GeneralRom, GenerationChangePolicy, ReloadConfig, SimulatedBus,
    SimulatedNode,
};
use std::time::Duration;

pub const LOCAL: u8 = 0;
pub const CYCLE_MASTER: u8 = 1;
pub const BUS_MANAGER: u8 = 2;
pub const IRM: u8 = 3;
pub const NODES: u8 = 4;

pub const GENERATION: u32 = 5;
pub const VENDOR: u32 = 0x00a0de;
pub const BANDWIDTH: u32 = 4915;
pub const FREE_CHANNELS: u64 = (1 << 0) | (1 << 31) | (1 << 62);

const PHY_SPEEDS: [Speed; NODES as usize] = [Speed::S400, Speed::S200, Speed::S400, Speed::S400];

pub fn guid(phy: u8) -> u64 {
    0x0800_4601_0000_0000 | u64::from(phy)
}

/// Pairwise speed: the slower of both PHYs, S200 for broadcast
pub fn speed(from: u8, to: u8) -> Speed {
    match (PHY_SPEEDS.get(usize::from(from)), PHY_SPEEDS.get(usize::from(to))) {
        (Some(&a), Some(&b)) => a.min(b),
        _ => Speed::S200,
    }
}

pub fn self_ids() -> Vec<u32> {
    [
        self_id(0, PHY_SPEEDS[0], false, &[PortState::Parent]),
        self_id(1, PHY_SPEEDS[1], true, &[PortState::Parent]),
        self_id(
            2,
            PHY_SPEEDS[2],
            true,
            &[PortState::Child, PortState::Child, PortState::Parent],
        ),
        self_id(3, PHY_SPEEDS[3], true, &[PortState::Child]),
    ]
    .concat()
}

pub fn rom(phy: u8, options: BusOptions) -> GeneralRom {
    GeneralRom::new(
        guid(phy),
        VENDOR,
        options
            .with_link_spd(PHY_SPEEDS[usize::from(phy)].code())
            .with_max_rec(8)
            .with_generation(1),
    )
}

/// Managed four node bus with every role filled
pub fn managed_bus() -> SimulatedBus {
    let bus = SimulatedBus::new();

    bus.add_node(SimulatedNode::new().with_general_rom(&rom(LOCAL, BusOptions::new())));
    bus.add_node(
        SimulatedNode::new()
            .with_general_rom(&rom(
                CYCLE_MASTER,
                BusOptions::new().with_cmc(true).with_isc(true),
            ))
            .with_cycle_timer(0x1234, 0x10)
            .with_cycle_master_enabled(),
    );
    bus.add_node(
        SimulatedNode::new()
            .with_general_rom(&rom(BUS_MANAGER, BusOptions::new().with_bmc(true)))
            .with_topology_map(GENERATION, &self_ids())
            .with_speed_map(GENERATION, speed),
    );
    bus.add_node(
        SimulatedNode::new()
            .with_general_rom(&rom(
                IRM,
                BusOptions::new()
                    .with_irmc(true)
                    .with_cmc(true)
                    .with_isc(true),
            ))
            .with_cycle_timer(0x5678, 0x10)
            .with_bus_manager_id(BUS_MANAGER)
            .with_irm_resources(BANDWIDTH, FREE_CHANNELS),
    );
    bus
}

/// Same bus without any resource manager capable node
pub fn unmanaged_bus() -> SimulatedBus {
    let bus = SimulatedBus::new();
    for phy in 0..NODES {
        bus.add_node(
            SimulatedNode::new()
                .with_general_rom(&rom(phy, BusOptions::new().with_isc(true)))
                .with_cycle_timer(0, 0),
        );
    }
    bus
}

/// Three attempts, no delays
pub fn fast_config() -> ReloadConfig {
    ReloadConfig::default()
        .with_max_attempts(3)
        .with_retry_delay(Duration::ZERO)
        .with_generation_policy(GenerationChangePolicy::Accept {
            settle: Duration::ZERO,
        })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("firewire_driver=debug")
        .with_test_writer()
        .try_init();
}
