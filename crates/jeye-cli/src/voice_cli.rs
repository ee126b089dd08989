//! `jeye voice`: watch mode driven by spoken commands.
//!
//! Without a platform recognizer in the terminal, each stdin line stands in
//! for one final recognition result. The session supervision, grammar and
//! dedupe are the same ones a real recognizer would go through.

use crate::watch::{build_widget, mount_with_renderer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use colored::Colorize;
use jeye_core::{
    JEyeConfig, ListenHandle, RecognizerEvent, SpeechRecognizer, Utterance, VoiceError,
    VoiceInterpreter,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Parser, Debug)]
pub struct VoiceArgs {
    /// Also write .jeye-status.json and .jeye-status.md into this directory
    #[arg(long, value_name = "DIR")]
    pub status_dir: Option<PathBuf>,
}

type SharedLines<R> = Arc<tokio::sync::Mutex<Lines<R>>>;

/// Treats lines from a reader as final recognition results.
pub struct LineRecognizer<R> {
    lines: SharedLines<R>,
    session: Mutex<Option<(ListenHandle, JoinHandle<()>)>>,
    next_handle: Mutex<u64>,
    closed: watch::Sender<bool>,
}

impl<R: AsyncBufRead + Unpin + Send + 'static> LineRecognizer<R> {
    pub fn new(reader: R) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            lines: Arc::new(tokio::sync::Mutex::new(reader.lines())),
            session: Mutex::new(None),
            next_handle: Mutex::new(0),
            closed,
        }
    }

    /// Flips to true once the reader hits end of input.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send + 'static> SpeechRecognizer for LineRecognizer<R> {
    async fn start_listening(
        &self,
        sink: mpsc::Sender<RecognizerEvent>,
    ) -> Result<ListenHandle, VoiceError> {
        if *self.closed.borrow() {
            return Err(VoiceError::Unavailable("input closed".into()));
        }
        let handle = {
            let mut next = self.next_handle.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            ListenHandle(*next)
        };

        let lines = Arc::clone(&self.lines);
        let closed = self.closed.clone();
        let task = tokio::spawn(async move {
            let mut index = 0;
            loop {
                let line = lines.lock().await.next_line().await;
                match line {
                    Ok(Some(text)) => {
                        let utterance = Utterance::final_result(text, index);
                        index += 1;
                        if sink.send(RecognizerEvent::Utterance(utterance)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        closed.send_replace(true);
                        break;
                    }
                    Err(e) => {
                        let _ = sink.send(RecognizerEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            let _ = sink.send(RecognizerEvent::Ended).await;
        });

        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((handle, task));
        if let Some((_, stale)) = previous {
            stale.abort();
        }
        Ok(handle)
    }

    async fn stop(&self, handle: ListenHandle) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.as_ref().is_some_and(|(current, _)| *current == handle)
            && let Some((_, task)) = session.take()
        {
            task.abort();
            debug!(session = handle.0, "Line recognizer stopped");
        }
    }
}

pub async fn execute(config: &JEyeConfig, args: VoiceArgs) -> Result<()> {
    let (widget, source) = build_widget(config)?;

    let recognizer = Arc::new(LineRecognizer::new(BufReader::new(tokio::io::stdin())));
    let mut closed = recognizer.closed();
    let voice = VoiceInterpreter::new(&config.voice, recognizer, Arc::new(widget.clone()))
        .context("Failed to build voice grammar")?
        .spawn(true);

    let (mounted, renderer) =
        mount_with_renderer(&widget, source, config, Some(voice), args.status_dir);
    println!(
        "{}",
        "voice mode: say (type) \"pause\" or \"resume\", optionally after a wake phrase".dimmed()
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = closed.wait_for(|closed| *closed) => {}
    }

    if let Some(stats) = mounted.unmount().await {
        println!(
            "voice: {} session(s), {} command(s), {} duplicate(s) suppressed",
            stats.sessions, stats.commands, stats.suppressed
        );
    }
    renderer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lines_become_final_utterances_then_end() {
        let recognizer = LineRecognizer::new(BufReader::new(&b"pause\nresume all\n"[..]));
        let mut closed = recognizer.closed();
        let (tx, mut rx) = mpsc::channel(8);
        recognizer.start_listening(tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                RecognizerEvent::Utterance(Utterance::final_result("pause", 0)),
                RecognizerEvent::Utterance(Utterance::final_result("resume all", 1)),
                RecognizerEvent::Ended,
            ]
        );

        tokio::time::timeout(Duration::from_secs(1), closed.wait_for(|c| *c))
            .await
            .unwrap()
            .unwrap();
        let (tx, _rx) = mpsc::channel(8);
        assert!(recognizer.start_listening(tx).await.is_err());
    }
}
