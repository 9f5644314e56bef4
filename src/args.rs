use clap::Parser;
use std::path::PathBuf;

/// datafill - 按配置为 JSON 对象批量填充关联数据
#[derive(Parser, Debug, Clone)]
#[command(name = "datafill")]
#[command(about = "从已注册的数据容器批量查询并回填 JSON 对象的关联字段")]
pub struct Args {
    /// 配置文件（TOML）
    #[arg(short, long)]
    pub config: PathBuf,

    /// 输入文件，JSON 数组或单个对象；缺省读取标准输入
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// 输出文件；缺省写到标准输出
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 只执行属于这些分组的装配操作
    #[arg(short = 'g', long = "group")]
    pub groups: Vec<String>,

    /// 覆盖配置中的执行方式
    #[arg(long)]
    pub batched: bool,

    /// 格式化输出
    #[arg(long)]
    pub pretty: bool,

    /// 日志级别，未指定时读取 RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,
}
