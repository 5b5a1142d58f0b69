//! Command implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use plantdoc_rag::gemini::{GeminiConfig, GeminiEmbeddingProvider, GeminiGenerator};
use plantdoc_rag::{
    DiskVectorIndex, PromptTemplate, RagConfig, RagError, RagPipeline, RecordMapping,
    VectorIndex, load_documents,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{info, warn};

use crate::cli::{AskArgs, BuildArgs, ChatArgs, Cli, Command, IndexArgs, QueryArgs};
use crate::output::{render_answer, render_inspect, render_report};

/// Run the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build(args) => build(args).await,
        Command::Ask(args) => ask(args).await,
        Command::Chat(args) => chat(args).await,
        Command::Inspect(args) => inspect(args).await,
    }
}

fn build_pipeline(
    gemini: GeminiConfig,
    index: Arc<dyn VectorIndex>,
    config: RagConfig,
    turkish: bool,
) -> Result<RagPipeline> {
    let template = if turkish { PromptTemplate::turkish() } else { PromptTemplate::english() };
    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(GeminiEmbeddingProvider::new(gemini.clone())))
        .vector_index(index)
        .generator(Arc::new(GeminiGenerator::new(gemini)))
        .prompt_template(template)
        .build()?;
    Ok(pipeline)
}

/// Credentials are checked before the index is touched.
fn gemini_config() -> Result<GeminiConfig> {
    GeminiConfig::from_env().context("Gemini credentials are required (set GEMINI_API_KEY)")
}

async fn build(args: BuildArgs) -> Result<()> {
    let gemini = gemini_config()?;
    let config = RagConfig::builder()
        .chunk_size(args.chunk_size)
        .chunk_overlap(args.chunk_overlap)
        .build()
        .context("invalid chunking parameters")?;

    let mut mapping = RecordMapping::default().with_content_field(&args.content_field);
    if let Some(field) = &args.id_field {
        mapping = mapping.with_id_field(field);
    }
    let documents = load_documents(&args.data, &mapping)
        .await
        .with_context(|| format!("failed to load {}", args.data.display()))?;

    let index_dir = &args.index.index_dir;
    let index = DiskVectorIndex::open_or_create(index_dir)
        .await
        .with_context(|| format!("failed to open index at {}", index_dir.display()))?;
    let pipeline = build_pipeline(gemini, Arc::new(index), config, false)?;

    let report = if args.rebuild {
        pipeline.rebuild_index(&documents).await
    } else {
        pipeline.build_index(&documents, args.mode.into()).await
    }
    .context("index build failed")?;

    print!("{}", render_report(&report, index_dir));
    Ok(())
}

/// Open the persisted index and wire the query pipeline.
async fn query_pipeline(args: &QueryArgs) -> Result<RagPipeline> {
    let gemini = gemini_config()?;
    let config = RagConfig::builder().top_k(args.top_k).build().context("invalid --top-k")?;
    let index = DiskVectorIndex::open(&args.index.index_dir).await?;
    let pipeline = build_pipeline(gemini, Arc::new(index), config, args.turkish)?;
    pipeline.check_index_compatibility().await?;
    Ok(pipeline)
}

async fn ask(args: AskArgs) -> Result<()> {
    let pipeline = query_pipeline(&args.query).await?;
    let answer = pipeline
        .answer_cancellable(&args.question, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer.to_response())?);
    } else {
        print!("{}", render_answer(&answer));
    }
    Ok(())
}

async fn chat(args: ChatArgs) -> Result<()> {
    let pipeline = query_pipeline(&args.query).await?;
    let mut editor = DefaultEditor::new().context("failed to start line editor")?;
    println!("Ask about plant diseases. Each question is answered on its own. Ctrl-D to quit.");

    loop {
        let line = match editor.readline("plantdoc> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("failed to read input"),
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        let _ = editor.add_history_entry(question);

        let outcome = pipeline
            .answer_cancellable(question, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        match outcome {
            Ok(answer) => println!("{}", render_answer(&answer)),
            Err(RagError::Cancelled) => println!("(cancelled)"),
            Err(e) if e.requires_reindex() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "question failed");
                eprintln!("error: {e}");
            }
        }
    }

    info!("chat session ended");
    Ok(())
}

async fn inspect(args: IndexArgs) -> Result<()> {
    let index = DiskVectorIndex::open(&args.index_dir).await?;
    let model = index.embedding_model().await;
    print!(
        "{}",
        render_inspect(
            &args.index_dir,
            index.len().await,
            index.dimension().await,
            model.as_deref(),
        )
    );
    Ok(())
}
