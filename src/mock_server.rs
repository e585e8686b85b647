use std::net::SocketAddr;

use clap::Parser;
use prompt_lab::{
    mock::{ollama_reply, open_webui_reply, MockServer},
    Target,
};
use tracing_subscriber::EnvFilter;

/// Typical model answer: prose around a fenced object with a trailing comma.
const CANNED_ANSWER: &str = r#"Here is the requirement analysis:

```json
{
  "functional": [
    "Users can search the catalog for books, journals and digital media",
    "Librarians can register new resources",
  ],
  "non_functional": [
    "Security: role based access for staff",
    "Performance: search results within 2 seconds",
  ]
}
```"#;

#[derive(Parser)]
struct Args {
    /// Address to listen on.
    #[clap(long, default_value = "127.0.0.1:11434")]
    addr: SocketAddr,

    /// Response shape. Either "ollama" or "open-webui".
    #[clap(long, short, default_value = "ollama")]
    target: Target,

    /// Model name echoed in replies.
    #[clap(long, default_value = prompt_lab::DEFAULT_MODEL)]
    model: String,

    /// Text returned as the generated answer.
    #[clap(long, default_value = CANNED_ANSWER)]
    answer: String,
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let Args {
        addr,
        target,
        model,
        answer,
    } = args;

    let server = MockServer::bind(addr, move |_| match target {
        Target::Ollama => ollama_reply(&model, &answer),
        Target::OpenWebUi => open_webui_reply(&model, &answer),
    })
    .await?;
    println!("URL_GENERATE={}", server.url());

    let requests = server.requests().clone();
    tokio::spawn(async move {
        while let Ok(request) = requests.recv_async().await {
            tracing::info!(
                method = %request.method,
                path = %request.path,
                authorized = request.authorization.is_some(),
                "{}",
                request.body
            );
        }
    });

    server.serve_forever().await?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args))
}
