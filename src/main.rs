// ==========================================
// 水资源风险监测平台 - 命令行入口
// ==========================================
// 用法:
//   water-risk-import <tasks.json> [--sequential] [--db <path>]
//
// tasks.json 为任务描述数组:
//   [{"format_type": "csv", "module_name": "iot_water_consumption", "data_source": "a.csv"}]
// 结果以 JSON 输出到 stdout，日志输出到 stderr
// ==========================================

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use water_risk_import::config::{ConfigManager, ImportConfigReader};
use water_risk_import::db::{default_db_path, open_sqlite_connection};
use water_risk_import::{logging, ImportManager, ImportTask, SqliteRecordSink, TaskDescriptor};

struct CliArgs {
    tasks_file: PathBuf,
    parallel: bool,
    db_path: PathBuf,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut tasks_file = None;
    let mut parallel = true;
    let mut db_path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sequential" => parallel = false,
            "--db" => {
                let path = args.next().context("--db 缺少路径参数")?;
                db_path = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => bail!("未知参数: {}", other),
            other => tasks_file = Some(PathBuf::from(other)),
        }
    }

    Ok(CliArgs {
        tasks_file: tasks_file
            .context("用法: water-risk-import <tasks.json> [--sequential] [--db <path>]")?,
        parallel,
        db_path: db_path.unwrap_or_else(default_db_path),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", water_risk_import::APP_NAME, water_risk_import::VERSION);
    tracing::info!("==================================================");

    let args = parse_args()?;

    let content = std::fs::read_to_string(&args.tasks_file)
        .with_context(|| format!("无法读取任务文件: {}", args.tasks_file.display()))?;
    let descriptors: Vec<TaskDescriptor> =
        serde_json::from_str(&content).context("任务文件不是合法的任务描述数组")?;

    // 先整体校验，调用方错误不进入执行
    let tasks = descriptors
        .into_iter()
        .enumerate()
        .map(|(i, d)| ImportTask::try_from(d).with_context(|| format!("第 {} 个任务无效", i + 1)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if let Some(parent) = args.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建数据库目录: {}", parent.display()))?;
        }
    }
    let db_path = args.db_path.to_string_lossy().to_string();
    tracing::info!("使用数据库: {}", db_path);

    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path)?));
    let config = ConfigManager::from_connection(conn.clone())?;
    let settings = config.load_settings().await?;
    let sink = Arc::new(SqliteRecordSink::from_connection(conn)?);

    let manager = ImportManager::new(settings, sink)?;
    let batch = manager.batch_import(tasks, args.parallel).await;

    println!("{}", serde_json::to_string_pretty(&batch)?);

    if batch.failed_tasks > 0 {
        tracing::warn!(failed = batch.failed_tasks, "部分任务未完成");
    }
    Ok(())
}
