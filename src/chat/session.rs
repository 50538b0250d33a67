//! Literature-search chat session
//!
//! One user turn runs in three phases:
//! 1. QUERY: the model proposes arXiv queries inside `<query>` tags
//! 2. SEARCH: queries run against the provider (optionally refined over several rounds)
//! 3. ANSWER: the model answers citing papers in reference tags, which are swapped for
//!    cards while the answer streams in
//!
//! The model sees the whole exchange (prompts included) as chat history; the transcript
//! only keeps what the user typed and the rendered answers.

use futures::StreamExt;
use serde::Serialize;

use crate::llm::{ChatMessage, GenerationConfig, LlmError, LlmProvider, LlmRequest};
use crate::papers::{PaperRecord, ResultMap, SearchProvider, SortCriterion};
use crate::settings::Settings;

use super::cards::CardStyle;
use super::rewriter::{ReferenceTag, StreamingTagRewriter};
use super::search::{extract_queries, SearchOrchestrator, SearchOutcome};

pub const MAX_ITERATIONS: u32 = 5;

/// Tunables of a chat session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Search rounds per turn, 1 to `MAX_ITERATIONS`
    pub iterations: u32,
    pub max_results: usize,
    pub sort: SortCriterion,
    pub tolerance: usize,
    pub rescan_every: usize,
    pub card_style: CardStyle,
    pub tag: ReferenceTag,
    /// Search `all:<prompt>` when the model proposes no query
    pub default_query_fallback: bool,
    pub config: GenerationConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            iterations: settings.refinement_iterations.clamp(1, MAX_ITERATIONS),
            max_results: settings.search_max_results,
            sort: SortCriterion::Relevance,
            tolerance: settings.reference_tolerance,
            rescan_every: settings.rescan_every_chunks,
            card_style: settings.card_style,
            tag: ReferenceTag::default(),
            default_query_fallback: settings.default_query_fallback,
            config: GenerationConfig::chat(),
        }
    }
}

/// Progress of a turn, reported while it runs
#[derive(Debug)]
pub enum ChatEvent<'a> {
    /// Queries about to run in search round `iteration` (1-based)
    Queries { iteration: u32, queries: &'a [String] },
    /// The model proposed no new query, previous ones are kept
    KeptQueries { iteration: u32 },
    /// A paper was added to the session results
    PaperAdded(&'a str),
    /// Inline notice (failed query, missing queries)
    Notice(&'a str),
    /// Answer text so far, references already rewritten
    Answer(&'a str),
}

/// Result of one user turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutput {
    pub answer: String,
    pub queries: Vec<String>,
    pub found: usize,
    pub notices: Vec<String>,
    pub cited: Vec<PaperRecord>,
}

pub fn system_instruction(tag: ReferenceTag) -> String {
    let example = tag.wrap("TITLE");
    format!(
        r#"You are a query creator, reviewer, and answer generator model. You create arXiv queries using the basic search syntax.
Field prefixes:
- ti -> Title
- au -> Author
- abs -> Abstract
- co -> Comment
- jr -> Journal Reference
- cat -> Subject Category
- rn -> Report Number
- all -> All of the above

Boolean operators:
- AND
- OR
- ANDNOT (for example, papers by Adrian DelMaestro whose titles do not contain the word checkerboard):

<query>au:del_maestro ANDNOT ti:checkerboard</query>

Grouping:
- ( ) groups Boolean expressions
- double quotes group words into a phrase
- a space extends the search to several fields

Example: <query>ti:(reasoning AND llm)</query>
Always use <query></query> tags and provide multiple queries if needed.

When asked for QUERY you must propose the queries inside <query></query> tags.
When asked for an ANSWER, state a criteria for selecting the papers, then select the most relevant ones and answer the user, writing the title of each paper inside {example} tags.
The tags will be replaced by a CARD, so put each one on its own line containing only the tags and the title:

{example}

Structure the final answer like this:
1. Think step by step to state the selection criteria (consider whether a paper has a journal reference and is relevant).
2. Introduce the most relevant papers one by one, evaluating how they fit the criteria:

I selected the following papers because [explanation]

{example}

{example}

I also considered those relevant because [explanation]

{example}
"#
    )
}

fn query_prompt(user_prompt: &str) -> String {
    format!(
        "generate a QUERY or QUERIES for the user prompt (remember the use of <query></query>):\n'{}'\n\n\
         (If the user only asks for clarification you can just use the responses from the previous queries)",
        user_prompt
    )
}

fn refinement_prompt(summary: &str) -> String {
    format!(
        "QUERY: Based on the following accumulated search results, analyze them for new patterns \
         (such as frequent authors, categories, or keywords) and generate additional arXiv search \
         queries to further refine the search results.\n\nPrevious Results:\n{}\n\n\
         Please generate new query(ies) in the following format: <query>Your query here</query>.",
        summary
    )
}

fn answer_prompt(summary: &str, tag: ReferenceTag) -> String {
    format!(
        "These are the results to the queries:\n{}\nUse them to generate an ANSWER (Remember to include \
         the {} tags for each answer, and state them in isolated lines, as they will be converted to cards \
         with the info).",
        summary,
        tag.wrap("TITLE")
    )
}

fn clarification_prompt(tag: ReferenceTag) -> String {
    format!(
        "The user probably only asked for clarification, check for it. (Remember to include the {} tags for each answer).",
        tag.wrap("TITLE")
    )
}

pub struct ChatSession<L, S> {
    llm: L,
    search: S,
    options: SessionOptions,
    system: String,
    /// Everything the model has seen
    history: Vec<ChatMessage>,
    /// What the user sees
    transcript: Vec<ChatMessage>,
    results: ResultMap,
    last_cited: Vec<PaperRecord>,
}

impl<L: LlmProvider, S: SearchProvider> ChatSession<L, S> {
    pub fn new(llm: L, search: S, mut options: SessionOptions) -> Self {
        options.iterations = options.iterations.clamp(1, MAX_ITERATIONS);
        Self {
            llm,
            search,
            system: system_instruction(options.tag),
            options,
            history: Vec::new(),
            transcript: Vec::new(),
            results: ResultMap::new(),
            last_cited: Vec::new(),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn results(&self) -> &ResultMap {
        &self.results
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Papers cited by the last answer
    pub fn last_cited(&self) -> &[PaperRecord] {
        &self.last_cited
    }

    /// Run one user turn.
    ///
    /// Search failures are reported as notices. Only a failing LLM call fails the
    /// turn; the history then keeps the exchanges that completed.
    pub async fn turn(
        &mut self,
        user_prompt: &str,
        mut on_event: impl FnMut(ChatEvent<'_>),
    ) -> Result<TurnOutput, LlmError> {
        let orchestrator = SearchOrchestrator::new(self.options.max_results, self.options.sort);

        let response = self.exchange(query_prompt(user_prompt)).await?;
        let mut queries = extract_queries(&response);
        if queries.is_empty() && self.options.default_query_fallback {
            let notice = "**No queries detected. Using a default query based on the user prompt.**";
            on_event(ChatEvent::Notice(notice));
            queries = vec![format!("all:{}", user_prompt.trim())];
        }

        let mut accumulated = SearchOutcome::default();
        for iteration in 1..=self.options.iterations {
            if iteration > 1 {
                let response = self.exchange(refinement_prompt(&accumulated.summary())).await?;
                let refined = extract_queries(&response);
                if refined.is_empty() {
                    on_event(ChatEvent::KeptQueries { iteration });
                } else {
                    queries = refined;
                }
            }

            on_event(ChatEvent::Queries { iteration, queries: &queries });
            let outcome = orchestrator.execute(&queries, &self.search, &mut self.results).await;
            for title in &outcome.titles {
                on_event(ChatEvent::PaperAdded(title));
            }
            for notice in &outcome.notices {
                on_event(ChatEvent::Notice(notice));
            }
            accumulated.absorb(outcome);
        }

        let prompt = if accumulated.found() > 0 {
            answer_prompt(&accumulated.summary(), self.options.tag)
        } else {
            clarification_prompt(self.options.tag)
        };

        let request = self.request(&prompt);
        let mut stream = self.llm.generate_stream(&request).await?;
        let mut raw = String::new();
        let mut rewriter = StreamingTagRewriter::new(&self.results, self.options.tag, self.options.card_style)
            .with_tolerance(self.options.tolerance)
            .with_rescan_every(self.options.rescan_every);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            raw.push_str(&chunk);
            rewriter.push(&chunk);
            on_event(ChatEvent::Answer(rewriter.text()));
        }
        let rewritten = rewriter.finish();
        on_event(ChatEvent::Answer(&rewritten.text));

        self.history.push(ChatMessage::user(prompt));
        self.history.push(ChatMessage::model(raw));
        self.transcript.push(ChatMessage::user(user_prompt));
        self.transcript.push(ChatMessage::model(rewritten.text.clone()));
        self.last_cited = rewritten.cited.clone();

        tracing::info!(
            queries = queries.len(),
            found = accumulated.found(),
            cited = rewritten.cited.len(),
            "Chat turn complete"
        );

        Ok(TurnOutput {
            answer: rewritten.text,
            queries,
            found: accumulated.found(),
            notices: accumulated.notices,
            cited: rewritten.cited,
        })
    }

    fn request(&self, prompt: &str) -> LlmRequest {
        let mut messages = self.history.clone();
        messages.push(ChatMessage::user(prompt));
        LlmRequest {
            system: Some(self.system.clone()),
            messages,
            config: self.options.config.clone(),
        }
    }

    /// Streamed request whose full text is kept in the history
    async fn exchange(&mut self, prompt: String) -> Result<String, LlmError> {
        let request = self.request(&prompt);
        let mut stream = self.llm.generate_stream(&request).await?;
        let mut response = String::new();
        while let Some(chunk) = stream.next().await {
            response.push_str(&chunk?);
        }
        tracing::debug!(response = %response, "Model reply");

        self.history.push(ChatMessage::user(prompt));
        self.history.push(ChatMessage::model(response.clone()));
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::search::tests::{paper, TableSearch};
    use crate::llm::{Role, TextStream};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted chunk lists, one per call, and records each request
    struct ScriptedChat {
        replies: Mutex<VecDeque<Result<Vec<String>, LlmError>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<Result<Vec<&str>, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(|chunks| chunks.into_iter().map(String::from).collect()))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_prompt(&self, index: usize) -> String {
            let requests = self.requests.lock().unwrap();
            requests[index].messages.last().unwrap().text.clone()
        }
    }

    impl LlmProvider for ScriptedChat {
        async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
            let mut stream = self.generate_stream(request).await?;
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                text.push_str(&chunk?);
            }
            Ok(text)
        }

        async fn generate_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            let chunks = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::new("script exhausted")))?;
            Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            card_style: CardStyle::Heading,
            ..SessionOptions::default()
        }
    }

    #[tokio::test]
    async fn test_turn_searches_and_rewrites_citations() {
        let llm = ScriptedChat::new(vec![
            Ok(vec!["<query>ti:attention</query>"]),
            Ok(vec!["I picked:\n<paper>Attention is all", " you need</paper>\nand ", "<paper>Unknown</paper>"]),
        ]);
        let search = TableSearch::new(vec![(
            "ti:attention",
            Ok(vec![paper("Attention Is All You Need", "Transformers.", Some("NeurIPS"))]),
        )]);
        let mut session = ChatSession::new(&llm, &search, options());

        let mut answers = Vec::new();
        let out = session
            .turn("papers on attention", |event| {
                if let ChatEvent::Answer(text) = event {
                    answers.push(text.to_string());
                }
            })
            .await
            .unwrap();

        assert_eq!(out.queries, vec!["ti:attention"]);
        assert_eq!(out.found, 1);
        assert_eq!(out.answer, "I picked:\n- ###### Attention Is All You Need\nand \n[NOT FOUND]\n");
        assert_eq!(out.cited.len(), 1);
        assert_eq!(session.last_cited()[0].title, "Attention Is All You Need");
        assert_eq!(answers.first().unwrap(), "I picked:\n<paper>Attention is all");

        // Answer prompt carries the result summary
        let answer_prompt = llm.last_prompt(1);
        assert!(answer_prompt.contains("### RESULTS:\n- ####'Attention Is All You Need':\n##### Abstract: Transformers.\n##### Journal Reference: NeurIPS\n"));

        // The model keeps the raw exchange, the transcript the rendered one
        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].text, "I picked:\n<paper>Attention is all you need</paper>\nand <paper>Unknown</paper>");
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[0].role, Role::User);
        assert_eq!(session.transcript()[1].text, out.answer);
        assert!(llm.requests.lock().unwrap()[1].system.as_deref().unwrap().contains("<paper>TITLE</paper>"));
    }

    #[tokio::test]
    async fn test_no_results_uses_clarification_prompt() {
        let llm = ScriptedChat::new(vec![Ok(vec!["No query needed."]), Ok(vec!["Sure, happy to clarify."])]);
        let search = TableSearch::new(vec![]);
        let mut session = ChatSession::new(&llm, &search, options());

        let out = session.turn("what did you mean?", |_| {}).await.unwrap();

        assert!(out.queries.is_empty());
        assert_eq!(out.found, 0);
        assert!(search.queries().is_empty());
        assert!(llm.last_prompt(1).starts_with("The user probably only asked for clarification"));
    }

    #[tokio::test]
    async fn test_default_query_fallback() {
        let llm = ScriptedChat::new(vec![Ok(vec!["hmm"]), Ok(vec!["answer"])]);
        let search = TableSearch::new(vec![]);
        let mut session = ChatSession::new(
            &llm,
            &search,
            SessionOptions { default_query_fallback: true, ..options() },
        );

        let out = session.turn(" graph neural networks ", |_| {}).await.unwrap();
        assert_eq!(out.queries, vec!["all:graph neural networks"]);
        assert_eq!(search.queries(), vec!["all:graph neural networks"]);
    }

    #[tokio::test]
    async fn test_failed_query_is_a_notice_not_an_error() {
        let llm = ScriptedChat::new(vec![
            Ok(vec!["<query>bad</query><query>good</query>"]),
            Ok(vec!["<paper>A</paper>"]),
        ]);
        let search = TableSearch::new(vec![("bad", Err(500)), ("good", Ok(vec![paper("A", "a", None)]))]);
        let mut session = ChatSession::new(&llm, &search, options());

        let mut notices = Vec::new();
        let out = session
            .turn("q", |event| {
                if let ChatEvent::Notice(n) = event {
                    notices.push(n.to_string());
                }
            })
            .await
            .unwrap();

        assert_eq!(notices, vec!["**Error processing query 'bad': search provider returned status 500**"]);
        assert_eq!(out.notices, notices);
        assert_eq!(out.answer, "- ###### A");
    }

    #[tokio::test]
    async fn test_refinement_rounds() {
        let llm = ScriptedChat::new(vec![
            Ok(vec!["<query>q1</query>"]),
            Ok(vec!["<query>q2</query>"]),
            Ok(vec!["nothing new"]),
            Ok(vec!["<paper>B</paper>"]),
        ]);
        let search = TableSearch::new(vec![
            ("q1", Ok(vec![paper("A", "a", None)])),
            ("q2", Ok(vec![paper("B", "b", None)])),
        ]);
        let mut session = ChatSession::new(&llm, &search, SessionOptions { iterations: 3, ..options() });

        let mut kept = Vec::new();
        let out = session
            .turn("q", |event| {
                if let ChatEvent::KeptQueries { iteration } = event {
                    kept.push(iteration);
                }
            })
            .await
            .unwrap();

        assert_eq!(search.queries(), vec!["q1", "q2", "q2"]);
        assert_eq!(kept, vec![3]);
        assert_eq!(out.found, 3);
        assert!(llm.last_prompt(1).starts_with("QUERY: Based on the following accumulated search results"));
        assert!(llm.last_prompt(1).contains("- ####'A':"));
        assert_eq!(out.answer, "- ###### B");
        assert_eq!(session.results().len(), 2);
    }

    #[tokio::test]
    async fn test_llm_failure_fails_turn() {
        let llm = ScriptedChat::new(vec![Err(LlmError::with_status(503, "unavailable"))]);
        let search = TableSearch::new(vec![]);
        let mut session = ChatSession::new(&llm, &search, options());

        let err = session.turn("q", |_| {}).await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_iterations_are_clamped() {
        let llm = ScriptedChat::new(vec![]);
        let search = TableSearch::new(vec![]);
        let session = ChatSession::new(&llm, &search, SessionOptions { iterations: 9, ..options() });
        assert_eq!(session.options().iterations, MAX_ITERATIONS);
        let session = ChatSession::new(&llm, &search, SessionOptions { iterations: 0, ..options() });
        assert_eq!(session.options().iterations, 1);
    }

    #[test]
    fn test_system_instruction_uses_tag_flavour() {
        let text = system_instruction(ReferenceTag::PaperCard);
        assert!(text.contains("<paper-card>TITLE</paper-card>"));
        assert!(!text.contains("<paper>TITLE</paper>"));
    }
}
