use raidmesh_core::coordinator::EncounterStatus;
use raidmesh_core::{BossTier, ContributorId, NodeId, PlacementStrategy};
use std::io::Write;

use crate::context::ConsoleContext;

pub type CommandResult = Result<(), String>;

fn err(e: impl std::fmt::Display) -> String {
    format!("error: {e}\n")
}

pub fn register_node(ctx: &ConsoleContext, id: &str, address: Option<&str>, region: Option<&str>) -> CommandResult {
    let address = address.map_or_else(|| format!("{id}.local:7000"), str::to_string);
    ctx.register_peer(NodeId::from(id), &address, region);
    println!("registered {id} at {address}");
    Ok(())
}

pub fn heartbeat(ctx: &ConsoleContext, id: &str, load: f64) -> CommandResult {
    let id = NodeId::from(id);
    ctx.coordinator().heartbeat(&id, load).map_err(err)?;
    ctx.transport.heal(&id);
    Ok(())
}

/// Take a node down: it stops receiving placements and replication, and
/// with `failover` its encounters move right away instead of on next write.
pub fn node_down(ctx: &ConsoleContext, id: &str, failover: bool) -> CommandResult {
    let id = NodeId::from(id);
    let coordinator = ctx.coordinator();
    if coordinator.node(&id).is_none() {
        return Err(format!("unknown node {id}\n"));
    }
    coordinator.mark_node_inactive(&id);
    ctx.transport.partition(id.clone());
    if failover {
        let report = coordinator.failover_node(&id);
        for (encounter, owner) in &report.reassigned {
            println!("{} -> {owner}", encounter.short());
        }
        for encounter in &report.stranded {
            println!("{} stranded", encounter.short());
        }
    }
    Ok(())
}

pub fn create(ctx: &ConsoleContext, kind: &str, tier: i64, region: Option<&str>) -> CommandResult {
    let tier = BossTier::from_level(tier);
    let id = ctx.coordinator().create_encounter(kind, tier, region).map_err(err)?;
    if let Some(data) = ctx.coordinator().encounter(&id) {
        println!(
            "{} {kind} {tier} on {} ({:.0} hp)",
            id.short(),
            data.owner_node,
            data.max_health
        );
    }
    Ok(())
}

pub fn hit(ctx: &ConsoleContext, encounter: &str, contributor: &str, amount: f64) -> CommandResult {
    let id = ctx.resolve_encounter(encounter)?;
    let health = ctx
        .coordinator()
        .record_damage(&id, &ContributorId::from(contributor), amount)
        .map_err(err)?;
    println!("{} hp left", health.round());
    Ok(())
}

pub fn kill(ctx: &ConsoleContext, encounter: &str, killer: Option<&str>) -> CommandResult {
    let id = ctx.resolve_encounter(encounter)?;
    let killer = killer.map(ContributorId::from);
    let settlement = ctx.coordinator().complete_kill(&id, killer.as_ref()).map_err(err)?;

    if let Some(summary) = &settlement.summary {
        println!(
            "{} grade {} difficulty {} ({:.2}x)",
            summary.boss_kind, summary.quality.grade, summary.difficulty.score, summary.difficulty_multiplier
        );
    }
    println!("{:<20} {:>10} {:>8} {:>10} {:>8}", "Contributor", "Damage", "Share", "Exp", "Spirits");
    println!("{}", "-".repeat(60));
    for reward in &settlement.rewards {
        let mut marker = String::new();
        if reward.is_killer {
            marker.push_str(" *");
        }
        if reward.dampened {
            marker.push_str(" (cooldown)");
        }
        println!(
            "{:<20} {:>10.0} {:>7.1}% {:>10.1} {:>8.1}{marker}",
            reward.contributor,
            reward.damage,
            reward.contribution * 100.0,
            reward.experience,
            reward.spirits
        );
    }
    Ok(())
}

pub fn despawn(ctx: &ConsoleContext, encounter: &str, reason: &str) -> CommandResult {
    let id = ctx.resolve_encounter(encounter)?;
    ctx.coordinator().despawn_encounter(&id, reason).map_err(err)
}

pub fn show(ctx: &ConsoleContext, encounter: &str) -> CommandResult {
    let id = ctx.resolve_encounter(encounter)?;
    let coordinator = ctx.coordinator();
    let data = coordinator
        .encounter(&id)
        .ok_or_else(|| format!("unknown encounter {encounter}\n"))?;

    println!("Encounter  {id}");
    println!("Boss       {} {}", data.boss_kind, data.tier);
    println!("Status     {}", data.status);
    println!(
        "Health     {:.0} / {:.0} ({:.1}%)",
        data.health,
        data.max_health,
        data.health_fraction() * 100.0
    );
    println!("Owner      {}", data.owner_node);
    if let Some(location) = &data.location {
        println!("Location   {}", location.display_name());
    }
    if let Some(record) = ctx.system.lifecycle_record(&id) {
        println!(
            "Difficulty {} {} ({:.2}x)",
            record.difficulty.score, record.difficulty.level, record.difficulty.multiplier
        );
    }
    println!("Version    {}", coordinator.sync().version(&id));
    for (node, replica) in ctx.transport.replicas() {
        println!("  replica {node:<12} v{}", replica.version(&id));
    }
    if data.status == EncounterStatus::Dead || data.status == EncounterStatus::Despawned {
        println!("(closed, showing last replicated snapshot)");
    }
    Ok(())
}

pub fn top(ctx: &ConsoleContext, encounter: &str, n: usize) -> CommandResult {
    let id = ctx.resolve_encounter(encounter)?;
    let ledger = ctx.coordinator().ledger();
    let top = ledger.top_contributors(&id, n);
    if top.is_empty() {
        println!("No damage recorded");
        return Ok(());
    }
    for (i, record) in top.iter().enumerate() {
        println!(
            "#{:<3} {:<20} {:>10.0} {:>6.1}% {:>5} hits",
            i + 1,
            record.contributor,
            record.total_damage,
            ledger.contribution_percentage(&id, &record.contributor),
            record.hit_count
        );
    }
    Ok(())
}

pub fn nodes(ctx: &ConsoleContext) -> CommandResult {
    let coordinator = ctx.coordinator();
    println!(
        "{:<12} {:<22} {:<8} {:<7} {:>5} {:>5} {:>6} {:>6}",
        "Node", "Address", "Region", "Active", "Load", "Enc", "Fails", "Weight"
    );
    println!("{}", "-".repeat(80));
    for node in coordinator.nodes() {
        let reliability = coordinator.balancer().reliability(&node.id);
        let local = if &node.id == coordinator.local_node() { " (local)" } else { "" };
        println!(
            "{:<12} {:<22} {:<8} {:<7} {:>5.2} {:>5} {:>6} {:>6.2}{local}",
            node.id,
            node.address,
            node.region.as_deref().unwrap_or("-"),
            node.is_active,
            node.load,
            node.active_encounters,
            reliability.consecutive_failures,
            reliability.effective_weight()
        );
    }
    Ok(())
}

pub fn history(ctx: &ConsoleContext, page: usize, size: usize) -> CommandResult {
    let kills = ctx.system.damage_history(page, size);
    if kills.is_empty() {
        println!("No kills recorded");
        return Ok(());
    }
    for kill in kills {
        println!(
            "{} {} {:<16} {:>3} players {:>10.0} dmg {:>5}s killer {}",
            kill.killed_at.format("%Y-%m-%d %H:%M:%S"),
            kill.encounter.short(),
            kill.boss_kind,
            kill.participant_count,
            kill.total_damage,
            kill.duration_secs,
            kill.killer.as_ref().map_or("-", |k| k.as_str())
        );
    }
    Ok(())
}

pub fn stats(ctx: &ConsoleContext) -> CommandResult {
    let stats = ctx.system.statistics();
    let json = serde_json::to_string_pretty(&stats).map_err(err)?;
    println!("{json}");
    Ok(())
}

pub fn sweep(ctx: &ConsoleContext) -> CommandResult {
    let report = ctx.coordinator().sweep();
    println!(
        "ledgers {} encounters {} transactions {} cooldowns {} decayed {} silent {} states {}",
        report.ledgers,
        report.expired_encounters,
        report.transactions,
        report.cooldowns,
        report.decayed_nodes,
        report.silent_nodes,
        report.stale_states
    );
    Ok(())
}

pub fn strategy(ctx: &ConsoleContext, name: Option<&str>) -> CommandResult {
    let balancer = ctx.coordinator().balancer();
    match name {
        None => println!("{}", balancer.strategy()),
        Some(name) => {
            let strategy = PlacementStrategy::from_label(name).ok_or_else(|| {
                let known: Vec<_> = PlacementStrategy::ALL.iter().map(|s| s.label()).collect();
                format!("unknown strategy '{name}', expected one of {}\n", known.join(", "))
            })?;
            balancer.set_strategy(strategy);
            println!("placement strategy: {strategy}");
        }
    }
    Ok(())
}

pub fn exit() -> CommandResult {
    write!(std::io::stdout(), "quitting...").map_err(|e| e.to_string())?;
    std::io::stdout().flush().map_err(|e| e.to_string())
}
