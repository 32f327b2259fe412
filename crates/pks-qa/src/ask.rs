//! `pks-qa ask`: the interactive prompt.
//!
//! With a question argument, answers it once and exits. Without one, reads
//! questions line by line until an empty line or EOF. A question that fails
//! prints an error line and the loop carries on.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use pks_qa_core::models::RetrievedChunk;

use crate::config::Config;
use crate::service::{self, QaService};

pub const PROMPT: &str = "Your question: ";

/// Format results the way the prompt prints them.
pub fn render_results(results: &[RetrievedChunk]) -> String {
    if results.is_empty() {
        return "No results.\n".to_string();
    }
    let mut out = String::from("Relevant Info:\n");
    for r in results {
        out.push_str("- ");
        out.push_str(&r.text);
        out.push('\n');
    }
    out
}

pub async fn run_ask(config: &Config, question: Option<String>) -> Result<()> {
    let service = service::start(config).await?;

    match question {
        Some(q) => {
            let mut stdout = tokio::io::stdout();
            answer_one(&service, &q, &mut stdout).await?;
        }
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            prompt_loop(&service, stdin, tokio::io::stdout()).await?;
        }
    }
    Ok(())
}

/// Read questions from `input` until a blank line or EOF.
///
/// Returns the number of questions answered (including failed ones).
pub async fn prompt_loop<R, W>(service: &QaService, input: R, mut output: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut asked = 0;

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\n").await?;
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        answer_one(service, question, &mut output).await?;
        asked += 1;
    }

    output.flush().await?;
    Ok(asked)
}

async fn answer_one<W>(service: &QaService, question: &str, output: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let text = match service.ask(question).await {
        Ok(results) => render_results(&results),
        Err(e) => {
            tracing::warn!(error = %e, "question failed");
            format!("Error: {}\n", e)
        }
    };
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
