use std::path::PathBuf;

use clap::{Parser, Subcommand};

use character_solver::Mover;
use mover_state::{MoverSettings, MoverState};
use rapier3d::math::{Isometry, Vector};
use rapier3d::prelude::{ColliderBuilder, Real};
use scene_rapier::{layer_groups, wedge_mesh, Scene};
use solver_core::{anomaly, logging};

const EXIT_SUCCESS: i32 = 0;
const EXIT_SETTINGS: i32 = 10;
const EXIT_DIVERGENCE: i32 = 11;
const EXIT_ANOMALY: i32 = 12;

const TICK_RATE: Real = 1.0 / 60.0;

#[derive(Parser)]
#[command(name = "tools", version, about = "Character solver tools CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Sim(SimArgs),
    Settings(SettingsArgs),
}

/// Headless deterministic simulation smoke.
#[derive(Parser)]
struct SimArgs {
    /// Fixed ticks to simulate.
    #[arg(long, default_value_t = 600)]
    ticks: u32,

    /// Optional TOML settings file for the simulated actor.
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Run the simulation twice and compare trajectory checksums.
    #[arg(long)]
    verify: bool,

    /// Keep per-step trace logging on stderr.
    #[arg(long)]
    verbose: bool,
}

/// Parse, validate and print a settings file.
#[derive(Parser)]
struct SettingsArgs {
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Sim(args) => run_sim(args),
        Commands::Settings(args) => run_settings(args),
    };
    std::process::exit(exit_code);
}

fn run_sim(args: SimArgs) -> i32 {
    anomaly::install_panic_hook();
    anomaly::clear_anomaly();

    if !args.verbose {
        logging::set_log_sink(|level, message| {
            if level != logging::LogLevel::Trace {
                eprintln!("[{}] {}", level, message);
            }
        });
    }

    let settings = match load_settings(args.settings.as_deref()) {
        Ok(settings) => settings,
        Err(code) => return code,
    };

    let checksum = simulate(args.ticks, &settings);
    println!("sim ok (ticks={}, checksum={:016x})", args.ticks, checksum);

    if args.verify {
        let second = simulate(args.ticks, &settings);
        if second != checksum {
            eprintln!(
                "determinism check failed: {:016x} != {:016x}",
                second, checksum
            );
            return EXIT_DIVERGENCE;
        }
        println!("verify ok (checksums match)");
    }

    if let Some(message) = anomaly::first_anomaly() {
        eprintln!("anomaly recorded during simulation: {}", message);
        return EXIT_ANOMALY;
    }

    EXIT_SUCCESS
}

fn run_settings(args: SettingsArgs) -> i32 {
    let text = match std::fs::read_to_string(&args.path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read {}: {}", args.path.display(), err);
            return EXIT_SETTINGS;
        }
    };

    let settings = match MoverSettings::parse_toml(&text) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("settings parse failed: {}", err);
            return EXIT_SETTINGS;
        }
    };

    let validation = settings.validate();
    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    for error in &validation.errors {
        println!("error: {}", error);
    }
    if !validation.is_ok() {
        return EXIT_SETTINGS;
    }

    match settings.to_toml() {
        Ok(normalized) => print!("{}", normalized),
        Err(err) => {
            eprintln!("settings serialization failed: {}", err);
            return EXIT_SETTINGS;
        }
    }
    println!(
        "snapshot size: {} bytes",
        net_snapshot::snapshot_size(&settings)
    );

    EXIT_SUCCESS
}

fn load_settings(path: Option<&std::path::Path>) -> Result<MoverSettings, i32> {
    let Some(path) = path else {
        return Ok(MoverSettings::default());
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("cannot read {}: {}", path.display(), err);
            return Err(EXIT_SETTINGS);
        }
    };
    let settings = match MoverSettings::parse_toml(&text) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("settings parse failed: {}", err);
            return Err(EXIT_SETTINGS);
        }
    };

    let validation = settings.validate();
    for warning in &validation.warnings {
        eprintln!("settings warning: {}", warning);
    }
    if !validation.is_ok() {
        for error in &validation.errors {
            eprintln!("settings error: {}", error);
        }
        return Err(EXIT_SETTINGS);
    }

    Ok(settings)
}

/// Runs the scripted course and folds every tick's resolved state into a
/// trajectory checksum.
fn simulate(ticks: u32, settings: &MoverSettings) -> u64 {
    let mut scene = fixture_scene(settings.collider_layer);

    let spawn = Vector::new(0.0, 0.0, 0.0);
    let (body, collider) = scene.insert_actor(
        spawn,
        settings.radius,
        settings.height,
        settings.collider_layer,
        1,
    );
    let mut mover = Mover::new(settings.clone(), 1, body, Some(collider), spawn);
    let mut processors = mover_processors::default_processors();

    let mut checksum = FNV_OFFSET;
    for tick in 1..=ticks {
        script_input(&mut mover, tick, ticks);
        mover.move_predicted(&mut scene, &mut processors, u64::from(tick), i64::from(tick), TICK_RATE);
        checksum = fold_state(checksum, mover.fixed_state());
    }

    checksum
}

/// Fixture course around the spawn at the origin: flat floor, a ramp to +x,
/// a low step to -x and a wall to +z.
fn fixture_scene(layer: u32) -> Scene {
    let mut scene = Scene::new();

    // Floor with its top at y = 0.
    scene.insert_static_collider(
        ColliderBuilder::cuboid(50.0, 0.5, 50.0)
            .position(Isometry::translation(0.0, -0.5, 0.0))
            .collision_groups(layer_groups(layer))
            .build(),
    );

    // Ramp rising 2 m over 4 m, toe at x = 6.
    let (vertices, indices) = wedge_mesh(4.0, 2.0, 6.0);
    scene.insert_convex_mesh_collider(
        vertices,
        indices,
        Isometry::translation(6.0, 0.0, 0.0),
        layer,
    );

    // Step with its top at y = 0.3, face at x = -4.
    scene.insert_static_collider(
        ColliderBuilder::cuboid(1.0, 0.15, 2.0)
            .position(Isometry::translation(-5.0, 0.15, 0.0))
            .collision_groups(layer_groups(layer))
            .build(),
    );

    // Wall across the +z path.
    scene.insert_static_collider(
        ColliderBuilder::cuboid(4.0, 2.0, 0.25)
            .position(Isometry::translation(0.0, 2.0, 8.0))
            .collision_groups(layer_groups(layer))
            .build(),
    );

    scene
}

/// Scripted input course: up the ramp, back over the step, a jump, then
/// into the wall. Pure function of the tick so reruns replay identically.
fn script_input(mover: &mut Mover, tick: u32, ticks: u32) {
    let quarter = (ticks / 4).max(1);

    if tick < quarter {
        mover.set_input_direction(Vector::new(1.0, 0.0, 0.0));
    } else if tick < quarter * 2 {
        mover.set_input_direction(Vector::new(-1.0, 0.0, 0.0));
    } else if tick < quarter * 3 {
        if tick == quarter * 2 {
            mover.jump(Vector::new(0.0, 5.0, 0.0));
        }
        mover.set_input_direction(Vector::new(0.0, 0.0, 1.0));
    } else {
        mover.set_input_direction(Vector::new(0.7, 0.0, 0.7));
    }

    mover.add_look(0.05, 0.25);
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fold_state(mut hash: u64, state: &MoverState) -> u64 {
    for value in [
        state.target_position.x,
        state.target_position.y,
        state.target_position.z,
        state.real_speed,
        state.look_yaw(),
    ] {
        for byte in value.to_bits().to_le_bytes() {
            hash = fold_byte(hash, byte);
        }
    }

    let flags = state.is_grounded as u8
        | (state.is_stepping_up as u8) << 1
        | (state.is_snapping_to_ground as u8) << 2;
    fold_byte(hash, flags)
}

fn fold_byte(hash: u64, byte: u8) -> u64 {
    (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
}
