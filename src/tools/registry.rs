use once_cell::sync::Lazy;
use serde_json::{json, Value};

/// One entry in the static tool registry: what the model sees advertised.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolDefinition {
    /// The OpenAI-format function schema sent to the completion endpoint.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// The process-wide tool set. Adding a tool here without adding a `ToolKind`
/// arm leaves it advertised but unimplemented, which the dispatcher reports
/// as an operator error.
pub static TOOLS: Lazy<Vec<ToolDefinition>> = Lazy::new(|| {
    let mut tools = vec![
        ToolDefinition {
            name: "gdpr_query",
            description: "Runs a semantic vector search against a database of vector embeddings \
                          of the full text of the General Data Protection Regulation (GDPR). \
                          Takes a natural-language query and returns the most relevant passages.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query_text": {
                        "type": "string",
                        "description": "Natural-language query sent to the vector database.\n\
                                        Example: 'What does the GDPR say about data minimization?'"
                    }
                },
                "required": ["query_text"]
            }),
        },
        ToolDefinition {
            name: "gdpr_get",
            description: "Queries a database containing the full text of the General Data \
                          Protection Regulation (GDPR) using metadata filtering to retrieve a \
                          full article, chapter, or section. Use this when you want all passages \
                          that belong to a specific article, chapter, or section.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "metadata_filter": {
                        "type": "object",
                        "description": "A single metadata filter specifying an article, chapter, \
                                        or section.\n\nExamples:\n- {\"article\": 9}\n\
                                        - {\"chapter\": 2}\n- {\"section\": 1}\n\n\
                                        Use only one metadata key:value pair. Combining multiple \
                                        metadata keys is not supported.",
                        "properties": {
                            "article": {"type": "integer"},
                            "chapter": {"type": "integer"},
                            "section": {"type": "integer"}
                        },
                        "additionalProperties": false
                    }
                },
                "required": ["metadata_filter"]
            }),
        },
        ToolDefinition {
            name: "edpb_query",
            description: "Runs a semantic vector search against a database of vector embeddings \
                          of all the recommendations and guidance issued by the European Data \
                          Protection Board. Takes a natural-language query and returns the most \
                          relevant passages.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query_text": {
                        "type": "string",
                        "description": "Natural-language query sent to the vector database.\n\
                                        Example: 'What guidance has the EDPB issued with regard \
                                        to data minimization?'"
                    }
                },
                "required": ["query_text"]
            }),
        },
    ];

    // Registered but wired to no handler arm, so tests can exercise the
    // dispatcher's unimplemented-tool path.
    #[cfg(test)]
    tools.push(ToolDefinition {
        name: "edpb_get",
        description: "Retrieves EDPB guidance documents by metadata filtering.",
        parameters: json!({
            "type": "object",
            "properties": {
                "metadata_filter": {"type": "object"}
            },
            "required": ["metadata_filter"]
        }),
    });

    tools
});

pub fn find(name: &str) -> Option<&'static ToolDefinition> {
    TOOLS.iter().find(|t| t.name == name)
}
