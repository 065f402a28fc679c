//! Biomedical Domain Operations
//!
//! Best-effort lookups against the tool server's `search` tool: literature,
//! clinical trials, genetic variants and drug interactions. Each operation
//! fires a `think` progress call without waiting for it, then runs the real
//! search and returns its `content` list. Any failure degrades to an empty
//! list; enrichment is optional for the caller.

use crate::mcp::client::ToolCaller;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Tool name for searches
pub const SEARCH_TOOL: &str = "search";

/// Tool name for progress thoughts
pub const THINK_TOOL: &str = "think";

/// Results requested per domain in every search
const MAX_RESULTS_PER_DOMAIN: u32 = 15;

/// Page size used by [`BiomedicalSearch::fetch_papers`] when none is given
pub const DEFAULT_PAPER_PAGE_SIZE: u32 = 10;

/// Upper bound accepted for `page_size`
pub const MAX_PAGE_SIZE: u32 = 100;

const KNOWN_DISEASES: &[&str] = &[
    "cancer",
    "diabetes",
    "melanoma",
    "ibd",
    "crohn",
    "colitis",
    "arthritis",
    "alzheimer",
    "parkinson",
];

const KNOWN_DRUGS: &[&str] = &[
    "adalimumab",
    "pembrolizumab",
    "infliximab",
    "methotrexate",
    "aspirin",
];

/// Query validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Query parameters must include a query string")]
    EmptyQuery,

    #[error("Page size must be between 1 and 100, got {0}")]
    PageSize(u32),
}

/// Kind of biomedical lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    LiteratureSearch,
    ClinicalTrials,
    GeneticVariants,
    DrugInteractions,
    GeneralBiomedical,
}

impl QueryType {
    /// Map a free-form label (e.g. from a query analyser) to a type
    ///
    /// Unknown labels map to [`QueryType::GeneralBiomedical`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "literature" | "literature_search" | "papers" | "pubmed" | "article" => {
                Self::LiteratureSearch
            }
            "clinical_trials" | "trials" | "trial" => Self::ClinicalTrials,
            "genetic_variants" | "genetic" | "variants" | "genes" | "variant" => {
                Self::GeneticVariants
            }
            "drug_interactions" | "drug" | "interactions" => Self::DrugInteractions,
            _ => Self::GeneralBiomedical,
        }
    }

    /// Guess the type from the wording of a question
    pub fn detect(text: &str) -> Self {
        let text = text.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));

        if mentions(&["paper", "article", "study", "literature"]) {
            Self::LiteratureSearch
        } else if mentions(&["trial", "clinical", "phase", "nct"]) {
            Self::ClinicalTrials
        } else if mentions(&["variant", "rs", "mutation", "gene"]) {
            Self::GeneticVariants
        } else if mentions(&["drug", "medication", "therapeutic"]) {
            Self::DrugInteractions
        } else {
            Self::GeneralBiomedical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiteratureSearch => "literature_search",
            Self::ClinicalTrials => "clinical_trials",
            Self::GeneticVariants => "genetic_variants",
            Self::DrugInteractions => "drug_interactions",
            Self::GeneralBiomedical => "general_biomedical",
        }
    }
}

/// Domain tag sent with every search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDomain {
    Article,
    Trial,
    Variant,
}

impl SearchDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Trial => "trial",
            Self::Variant => "variant",
        }
    }
}

/// Extracted search parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameters {
    pub query: String,
    pub domain: String,
    pub page_size: u32,
    #[serde(default)]
    pub genes: Vec<String>,
    #[serde(default)]
    pub diseases: Vec<String>,
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl QueryParameters {
    /// Parameters for `query` with terms pulled out of the text itself
    pub fn from_text(query: &str, domain: &str, page_size: u32) -> Self {
        let terms = ExtractedTerms::from_text(query);
        Self {
            query: query.trim().to_string(),
            domain: domain.to_string(),
            page_size,
            keywords: terms.keywords(),
            genes: terms.genes,
            diseases: terms.diseases,
            variants: terms.variants,
        }
    }
}

/// Biomedical terms recognised in free text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTerms {
    pub genes: Vec<String>,
    pub variants: Vec<String>,
    pub diseases: Vec<String>,
    pub drugs: Vec<String>,
}

impl ExtractedTerms {
    /// Scan `text` word by word
    ///
    /// Genes are upper-case symbols of at least two letters (`BRCA1`, `TNF`),
    /// variants are dbSNP ids (`rs12345`), diseases and drugs come from small
    /// fixed vocabularies.
    pub fn from_text(text: &str) -> Self {
        let mut terms = Self::default();
        for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let bucket = if is_gene_symbol(word) {
                &mut terms.genes
            } else if is_rsid(word) {
                &mut terms.variants
            } else if KNOWN_DISEASES.contains(&word) {
                &mut terms.diseases
            } else if KNOWN_DRUGS.contains(&word) {
                &mut terms.drugs
            } else {
                continue;
            };
            if !bucket.iter().any(|w| w == word) {
                bucket.push(word.to_string());
            }
        }
        terms
    }

    /// Every recognised term, de-duplicated
    pub fn keywords(&self) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for term in self
            .genes
            .iter()
            .chain(&self.variants)
            .chain(&self.diseases)
            .chain(&self.drugs)
        {
            if !keywords.contains(term) {
                keywords.push(term.clone());
            }
        }
        keywords
    }
}

fn is_gene_symbol(word: &str) -> bool {
    let leading = word.chars().take_while(|c| c.is_ascii_uppercase()).count();
    leading >= 2
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn is_rsid(word: &str) -> bool {
    word.strip_prefix("rs")
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

/// A validated lookup request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomedicalQuery {
    id: Uuid,
    text: String,
    query_type: QueryType,
    parameters: QueryParameters,
    created_at: DateTime<Utc>,
}

impl BiomedicalQuery {
    /// Build and validate a query
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the parameter query is empty or the page size
    /// is outside `1..=100`.
    pub fn new(
        text: &str,
        query_type: QueryType,
        parameters: QueryParameters,
    ) -> Result<Self, QueryError> {
        if parameters.query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if parameters.page_size == 0 || parameters.page_size > MAX_PAGE_SIZE {
            return Err(QueryError::PageSize(parameters.page_size));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            text: text.trim().to_string(),
            query_type,
            parameters,
            created_at: Utc::now(),
        })
    }

    /// Build a query from an analyser's type label
    pub fn from_label(
        text: &str,
        label: &str,
        parameters: QueryParameters,
    ) -> Result<Self, QueryError> {
        Self::new(text, QueryType::from_label(label), parameters)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn parameters(&self) -> &QueryParameters {
        &self.parameters
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn page_size(&self) -> u32 {
        self.parameters.page_size
    }

    pub fn has_genes(&self) -> bool {
        !self.parameters.genes.is_empty()
    }

    pub fn has_diseases(&self) -> bool {
        !self.parameters.diseases.is_empty()
    }

    pub fn has_variants(&self) -> bool {
        !self.parameters.variants.is_empty()
    }
}

/// Arguments of the `think` progress call
pub fn thought_params(thought: &str) -> Value {
    json!({
        "thought": thought,
        "thoughtNumber": 1,
        "totalThoughts": 1,
        "nextThoughtNeeded": true,
        "_meta": { "progressToken": 1 },
    })
}

/// Arguments of a `search` call
pub fn search_params(query: &BiomedicalQuery, call_benefit: &str, domain: SearchDomain) -> Value {
    let parameters = query.parameters();
    json!({
        "query": parameters.query,
        "call_benefit": call_benefit,
        "domain": domain.as_str(),
        "genes": parameters.genes,
        "diseases": parameters.diseases,
        "variants": parameters.variants,
        "keywords": parameters.keywords,
        "conditions": [],
        "interventions": [],
        "page": 1,
        "page_size": parameters.page_size,
        "max_results_per_domain": MAX_RESULTS_PER_DOMAIN,
        "explain_query": true,
        "get_schema": false,
        "_meta": { "progressToken": 0 },
    })
}

/// Domain operations over any [`ToolCaller`]
#[derive(Clone)]
pub struct BiomedicalSearch {
    caller: Arc<dyn ToolCaller>,
}

impl BiomedicalSearch {
    pub fn new(caller: Arc<dyn ToolCaller>) -> Self {
        Self { caller }
    }

    pub async fn search_literature(&self, query: &BiomedicalQuery) -> Vec<Value> {
        self.run(
            query,
            format!("Searching literature for: {}", query.text()),
            format!("Searching biomedical literature for: {}", query.text()),
            SearchDomain::Article,
        )
        .await
    }

    pub async fn search_clinical_trials(&self, query: &BiomedicalQuery) -> Vec<Value> {
        self.run(
            query,
            format!("Searching clinical trials for: {}", query.text()),
            format!("Searching clinical trials for: {}", query.text()),
            SearchDomain::Trial,
        )
        .await
    }

    pub async fn genetic_variant_info(&self, query: &BiomedicalQuery) -> Vec<Value> {
        self.run(
            query,
            format!("Searching genetic variants for: {}", query.text()),
            format!("Searching genetic variant info for: {}", query.text()),
            SearchDomain::Variant,
        )
        .await
    }

    /// Drug interactions are searched in the literature
    pub async fn search_drug_interactions(&self, query: &BiomedicalQuery) -> Vec<Value> {
        self.run(
            query,
            format!("Searching drug interactions for: {}", query.text()),
            format!("Searching drug interactions for: {}", query.text()),
            SearchDomain::Article,
        )
        .await
    }

    /// Route `query` to the operation for its type
    ///
    /// General biomedical questions have no matching search and yield an
    /// empty list without contacting the server.
    pub async fn search(&self, query: &BiomedicalQuery) -> Vec<Value> {
        match query.query_type() {
            QueryType::LiteratureSearch => self.search_literature(query).await,
            QueryType::ClinicalTrials => self.search_clinical_trials(query).await,
            QueryType::GeneticVariants => self.genetic_variant_info(query).await,
            QueryType::DrugInteractions => self.search_drug_interactions(query).await,
            QueryType::GeneralBiomedical => {
                tracing::debug!("No biomedical search for general query {}", query.id());
                Vec::new()
            }
        }
    }

    /// Literature search with `text` as its only keyword
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if `text` is empty or the page size is invalid.
    pub async fn fetch_papers(
        &self,
        text: &str,
        domain: &str,
        page_size: Option<u32>,
    ) -> Result<Vec<Value>, QueryError> {
        let parameters = QueryParameters {
            query: text.to_string(),
            domain: domain.to_string(),
            page_size: page_size.unwrap_or(DEFAULT_PAPER_PAGE_SIZE),
            genes: Vec::new(),
            diseases: Vec::new(),
            variants: Vec::new(),
            keywords: vec![text.to_string()],
        };
        let query = BiomedicalQuery::new(text, QueryType::LiteratureSearch, parameters)?;
        Ok(self.search_literature(&query).await)
    }

    async fn run(
        &self,
        query: &BiomedicalQuery,
        thought: String,
        call_benefit: String,
        domain: SearchDomain,
    ) -> Vec<Value> {
        // Sent ahead of the search it announces; its outcome is ignored
        self.caller
            .submit(THINK_TOOL, thought_params(&thought))
            .await;

        let envelope = self
            .caller
            .call(SEARCH_TOOL, search_params(query, &call_benefit, domain))
            .await;
        if !envelope.success {
            tracing::warn!(
                "{} search for query {} returned no results: {}",
                domain.as_str(),
                query.id(),
                envelope.error.as_deref().unwrap_or("unknown error")
            );
            return Vec::new();
        }

        let content = envelope.content();
        tracing::info!(
            "{} search for query {} returned {} items",
            domain.as_str(),
            query.id(),
            content.len()
        );
        content
    }
}
