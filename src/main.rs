use anyhow::{bail, Context, Result};
use clap::Parser;
use datafill::args::Args;
use datafill::assemble::ExecutionMode;
use datafill::config::EngineConfig;
use serde_json::Value;
use std::io::{Read, Write};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let mut config = EngineConfig::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;
    if args.batched {
        config.assemble.mode = ExecutionMode::Batched;
    }

    let executor = config.build_executor().context("初始化容器注册表失败")?;
    let operations = config.operations();

    let raw = read_input(&args)?;
    let (mut targets, single) = match serde_json::from_str::<Value>(&raw).context("输入不是合法的 JSON")? {
        Value::Array(items) => (items, false),
        object @ Value::Object(_) => (vec![object], true),
        other => bail!("输入必须是 JSON 数组或对象，实际为: {}", other),
    };

    let report = if args.groups.is_empty() {
        executor.execute(&mut targets, &operations).await
    } else {
        executor
            .execute_in_groups(&mut targets, &operations, &args.groups)
            .await
    };
    log::info!(
        "装配完成: {} 个对象, {} 个操作, {} 次写回",
        targets.len(),
        report.operations.len(),
        report.targets_enriched()
    );

    let output = if single {
        targets.pop().unwrap_or(Value::Null)
    } else {
        Value::Array(targets)
    };
    write_output(&args, &output)?;

    for err in executor.registry().clear() {
        log::warn!("销毁容器失败: {}", err);
    }

    if !report.is_success() {
        for (op, err) in report.errors() {
            eprintln!("❌ {}: {}", op.label, err);
        }
        bail!("{} 个装配操作失败", report.errors().count());
    }
    Ok(())
}

fn init_logging(level: Option<&str>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    let _ = builder.try_init();
}

fn read_input(args: &Args) -> Result<String> {
    match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("读取输入失败: {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("读取标准输入失败")?;
            Ok(buf)
        }
    }
}

fn write_output(args: &Args, output: &Value) -> Result<()> {
    let rendered = if args.pretty {
        serde_json::to_string_pretty(output)?
    } else {
        serde_json::to_string(output)?
    };
    match &args.output {
        Some(path) => std::fs::write(path, rendered + "\n")
            .with_context(|| format!("写入输出失败: {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", rendered)?;
            Ok(())
        }
    }
}
