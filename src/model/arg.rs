use clap::Parser;

/// LLM API 捕获代理
#[derive(Parser, Debug)]
#[command(name = "llm-tap", version, about)]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,
}
