use biped_motion::biped::SensorData;
use biped_motion::joints::{Joint, Side};
use biped_motion::pose::{pose2, Step};
use biped_motion::request::{HeadRequest, MotionRequest};
use biped_motion::walk::WalkState;
use biped_motion::{MotionConfig, MotionControl};

const DT: f64 = 0.012;

/// One entry of the demo script: what behavior asks for, and for how long.
struct Segment {
    label: &'static str,
    request: MotionRequest,
    duration: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("Biped Motion Demo");
    println!("=================\n");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading configuration from {path}");
            MotionConfig::from_file(&path)?
        }
        None => MotionConfig::default(),
    };

    println!("\nRobot Configuration:");
    println!("  Leg length: {:.4} m", config.dimensions.max_leg_length());
    println!("  Hip width: {:.3} m", 2.0 * config.dimensions.y_hip_offset);
    println!("  Walk hip height: {:.3} m", config.walk.walk_hip_height);
    println!("  Base step duration: {:.2} s", config.walk.base_step_duration);
    println!("  Total mass: {:.2} kg", config.masses.total());
    println!();

    let mut control = MotionControl::from_config(config)?;

    let script = [
        Segment {
            label: "stand",
            request: MotionRequest::stand(),
            duration: 1.0,
        },
        Segment {
            label: "walk",
            request: MotionRequest::walk_at(Step::new(0.15, 0.0, 0.3)),
            duration: 4.0,
        },
        Segment {
            label: "walk to",
            request: MotionRequest::walk_to(pose2(0.2, 0.05, 0.0)),
            duration: 3.0,
        },
        Segment {
            label: "kick",
            request: MotionRequest::kick("forward", Side::Left),
            duration: 4.0,
        },
        Segment {
            label: "stop",
            request: MotionRequest::stand(),
            duration: 1.0,
        },
    ];

    println!("Running at {:.0} Hz (dt = {:.3}s)\n", 1.0 / DT, DT);
    println!(
        "{:<6} {:<8} {:<14} {:<10} {:<26} {:<16}",
        "Time", "Request", "Motion", "Walk", "Odometry [x, y, rot]", "Knee [L, R]"
    );
    println!("{}", "-".repeat(84));

    // joints follow the request and the weight follows the swing leg late in every step
    let mut sensors = SensorData::new();
    let head = HeadRequest::default();
    let mut next_print = 0.0;
    for segment in &script {
        let cycles = (segment.duration / DT).round() as usize;
        for _ in 0..cycles {
            let generator = control.walk_engine().generator();
            let swing_sign = if generator.is_left_phase() { 1.0 } else { -1.0 };
            sensors.foot_support = if generator.phase() >= 0.85 {
                swing_sign
            } else {
                -swing_sign
            };

            let cycle = control.update(&sensors, &segment.request, &head, DT);
            sensors.joint_angles = cycle.joint_request.angles;

            if control.time() >= next_print {
                let walk_state = match cycle.info.walk_status.map(|status| status.walk_state) {
                    Some(WalkState::Standing) => "standing",
                    Some(WalkState::Starting) => "starting",
                    Some(WalkState::Walking) => "walking",
                    Some(WalkState::Stopping) => "stopping",
                    None => "-",
                };
                println!(
                    "{:<6.2} {:<8} {:<14} {:<10} [{:>6.3}, {:>6.3}, {:>6.3}]     [{:>5.2}, {:>5.2}]",
                    control.time(),
                    segment.label,
                    format!("{:?}", cycle.info.active),
                    walk_state,
                    cycle.odometry.x(),
                    cycle.odometry.y(),
                    cycle.odometry.rotation(),
                    cycle.joint_request.angles[Joint::LKneePitch],
                    cycle.joint_request.angles[Joint::RKneePitch],
                );
                next_print += 0.25;
            }
        }
    }

    let odometry = control.update(&sensors, &MotionRequest::stand(), &head, DT).odometry;
    println!("\n--- Demo Complete ---");
    println!(
        "Final odometry: [{:.3}, {:.3}, {:.3}]",
        odometry.x(),
        odometry.y(),
        odometry.rotation()
    );

    Ok(())
}
