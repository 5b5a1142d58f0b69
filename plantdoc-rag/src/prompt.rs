//! Grounded prompt assembly.
//!
//! [`PromptAssembler::assemble`] is a pure function of the question and the
//! retrieval result. The instruction section always carries the fixed refusal
//! sentence, whatever was retrieved.

use serde::{Deserialize, Serialize};

use crate::document::RetrievalResult;

const REFUSAL_PLACEHOLDER: &str = "{refusal}";

/// The fixed text around the retrieved context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    /// Role and constraint text. `{refusal}` is replaced by [`refusal`](Self::refusal).
    pub instructions: String,
    /// The sentence the model must answer with when the context lacks the answer.
    pub refusal: String,
    /// Line opening the context section.
    pub context_header: String,
    /// Line closing the context section.
    pub context_footer: String,
    /// Inserted between consecutive chunk texts.
    pub chunk_separator: String,
    /// Label in front of the question.
    pub question_label: String,
    /// Final line inviting the answer.
    pub answer_label: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::english()
    }
}

impl PromptTemplate {
    /// English plant-disease expert template.
    pub fn english() -> Self {
        Self {
            instructions: "You are an AI assistant specialised in agricultural plant diseases. \
                Your task is to answer the user's question in a detailed and informative way \
                using ONLY the context given below. Do not use any other knowledge. \
                If the answer to the question is NOT in the given context, reply exactly: \
                \"{refusal}\""
                .to_string(),
            refusal: "I'm sorry, the answer to this question is not available in my plant \
                disease knowledge base."
                .to_string(),
            context_header: "--- CONTEXT ---".to_string(),
            context_footer: "---".to_string(),
            chunk_separator: "\n\n".to_string(),
            question_label: "Question:".to_string(),
            answer_label: "Answer:".to_string(),
        }
    }

    /// Turkish template; answers are requested in Turkish.
    pub fn turkish() -> Self {
        Self {
            instructions: "Sen tarımsal hastalıklar konusunda uzman bir yapay zeka asistanısın. \
                Görevin, kullanıcının sorusunu SADECE aşağıda verilen bağlam (context) bilgisine \
                göre detaylı ve bilgilendirici bir şekilde yanıtlamaktır. Eğer verilen bağlamda \
                sorunun cevabı YOKSA, \"{refusal}\" diye cevap vermelisin. Cevaplarını Türkçe ver."
                .to_string(),
            refusal: "Üzgünüm, bu sorunun cevabı elimdeki bitki hastalıkları bilgi tabanında \
                bulunmamaktadır."
                .to_string(),
            context_header: "--- BAĞLAM ---".to_string(),
            context_footer: "---".to_string(),
            chunk_separator: "\n\n".to_string(),
            question_label: "Kullanıcının Sorusu:".to_string(),
            answer_label: "Cevap:".to_string(),
        }
    }

    /// The instruction section with the refusal sentence filled in.
    pub fn instruction_section(&self) -> String {
        if self.instructions.contains(REFUSAL_PLACEHOLDER) {
            self.instructions.replace(REFUSAL_PLACEHOLDER, &self.refusal)
        } else {
            format!(
                "{} If the context does not contain the answer, reply exactly: \"{}\"",
                self.instructions, self.refusal
            )
        }
    }
}

/// Builds the single instruction sent to the generator.
#[derive(Debug, Clone, Default)]
pub struct PromptAssembler {
    template: PromptTemplate,
}

impl PromptAssembler {
    /// Create an assembler around `template`.
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }

    /// The template in use.
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// The fixed refusal sentence.
    pub fn refusal(&self) -> &str {
        &self.template.refusal
    }

    /// Merge the retrieved chunks and the question into one prompt.
    ///
    /// Chunk texts are inserted verbatim, in retrieval order. With an empty
    /// retrieval the context section is empty, but the instructions and the
    /// refusal sentence are still present.
    pub fn assemble(&self, question: &str, retrieval: &RetrievalResult) -> String {
        let t = &self.template;
        let context = retrieval.texts().collect::<Vec<_>>().join(&t.chunk_separator);
        format!(
            "{instructions}\n\n{header}\n{context}\n{footer}\n\n{question_label} {question}\n{answer_label}",
            instructions = t.instruction_section(),
            header = t.context_header,
            footer = t.context_footer,
            question_label = t.question_label,
            answer_label = t.answer_label,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::{Chunk, SearchResult};

    fn hit(text: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: format!("{text}:0"),
                text: text.to_string(),
                document_id: "doc".to_string(),
                offset: 0,
                metadata: HashMap::new(),
            },
            score,
        }
    }

    #[test]
    fn context_is_verbatim_and_ordered() {
        let assembler = PromptAssembler::default();
        let retrieval =
            RetrievalResult::new(vec![hit("first chunk", 0.9), hit("second chunk", 0.5)]);
        let prompt = assembler.assemble("What is it?", &retrieval);

        assert!(prompt.contains("--- CONTEXT ---\nfirst chunk\n\nsecond chunk\n---"));
        assert!(prompt.ends_with("Question: What is it?\nAnswer:"));
        assert!(prompt.find("first chunk").unwrap() < prompt.find("second chunk").unwrap());
    }

    #[test]
    fn empty_retrieval_keeps_instructions() {
        let assembler = PromptAssembler::default();
        let prompt = assembler.assemble("When should wheat be sown?", &RetrievalResult::default());

        assert!(prompt.starts_with("You are an AI assistant"));
        assert!(prompt.contains(assembler.refusal()));
        assert!(prompt.contains("--- CONTEXT ---\n\n---"));
    }

    #[test]
    fn refusal_sentence_sits_in_instruction_section() {
        for template in [PromptTemplate::english(), PromptTemplate::turkish()] {
            let assembler = PromptAssembler::new(template.clone());
            let prompt = assembler.assemble("q", &RetrievalResult::new(vec![hit("ctx", 1.0)]));
            let instructions_end = prompt.find(&template.context_header).unwrap();
            assert!(prompt[..instructions_end].contains(&template.refusal));
            assert!(!template.instruction_section().contains(REFUSAL_PLACEHOLDER));
        }
    }

    #[test]
    fn template_without_placeholder_still_gets_refusal() {
        let template = PromptTemplate {
            instructions: "Answer from context only.".to_string(),
            ..PromptTemplate::english()
        };
        assert!(template.instruction_section().contains(&template.refusal));
    }

    #[test]
    fn assembly_is_deterministic() {
        let assembler = PromptAssembler::new(PromptTemplate::turkish());
        let retrieval = RetrievalResult::new(vec![hit("Domates bakteriyel leke", 0.8)]);
        assert_eq!(
            assembler.assemble("Belirtiler?", &retrieval),
            assembler.assemble("Belirtiler?", &retrieval)
        );
    }
}
