//! ZTrack 演示宿主
//!
//! 用法：`ztrack [--verbose] [scene.json]`
//!
//! 不给脚本时回放内置演示场景。

mod script;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use script::SceneScript;

#[derive(Parser, Debug)]
#[command(name = "ztrack", version, about = "Replay a linked-geometry drag scene")]
struct Args {
    /// 输出 debug 日志（包括消息分发）
    #[arg(short, long)]
    verbose: bool,

    /// JSON 场景脚本，缺省时回放内置演示场景
    script: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    // 初始化日志
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(level).finish(),
    )?;

    info!("Starting ZTrack...");

    let script = match &args.script {
        Some(path) => {
            info!("Loading scene script {}", path.display());
            SceneScript::load(path)?
        }
        None => {
            info!("No scene script given, replaying the demo scene");
            SceneScript::demo()?
        }
    };

    let summary = script.run(args.verbose)?;

    for outcome in &summary.outcomes {
        info!("Pointer event: {:?}", outcome);
    }
    for (name, coordinates) in &summary.coordinates {
        let points: Vec<String> = coordinates
            .iter()
            .map(|p| format!("({:.3}, {:.3}, {:.3})", p.x, p.y, p.z))
            .collect();
        info!("{}: {}", name, points.join(" "));
    }
    info!(
        "{} scene writes, {} failed deferred tasks",
        summary.scene_writes, summary.failed_tasks
    );

    Ok(())
}
