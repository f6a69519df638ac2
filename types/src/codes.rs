//! Coded terminology references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminology a [`Code`] is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeSystem {
    Icd10Cm,
    Cpt,
    Hcpcs,
    Loinc,
    Snomed,
    Ndc,
    RxNorm,
    Local,
}

impl CodeSystem {
    pub const ALL: [CodeSystem; 8] = [
        CodeSystem::Icd10Cm,
        CodeSystem::Cpt,
        CodeSystem::Hcpcs,
        CodeSystem::Loinc,
        CodeSystem::Snomed,
        CodeSystem::Ndc,
        CodeSystem::RxNorm,
        CodeSystem::Local,
    ];

    /// Canonical system URI used by FHIR codings.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            CodeSystem::Icd10Cm => "http://hl7.org/fhir/sid/icd-10-cm",
            CodeSystem::Cpt => "http://www.ama-assn.org/go/cpt",
            CodeSystem::Hcpcs => "urn:oid:2.16.840.1.113883.6.285",
            CodeSystem::Loinc => "http://loinc.org",
            CodeSystem::Snomed => "http://snomed.info/sct",
            CodeSystem::Ndc => "http://hl7.org/fhir/sid/ndc",
            CodeSystem::RxNorm => "http://www.nlm.nih.gov/research/umls/rxnorm",
            CodeSystem::Local => "urn:healthsim:local",
        }
    }

    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|system| system.uri() == uri)
    }

    /// Coding-system mnemonic used in HL7 v2 CE/CWE components.
    #[must_use]
    pub const fn hl7_mnemonic(self) -> &'static str {
        match self {
            CodeSystem::Icd10Cm => "I10",
            CodeSystem::Cpt => "C4",
            CodeSystem::Hcpcs => "HCPCS",
            CodeSystem::Loinc => "LN",
            CodeSystem::Snomed => "SCT",
            CodeSystem::Ndc => "NDC",
            CodeSystem::RxNorm => "RXNORM",
            CodeSystem::Local => "L",
        }
    }

    #[must_use]
    pub fn from_hl7_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|system| system.hl7_mnemonic() == mnemonic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code {
    pub system: CodeSystem,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Code {
    #[must_use]
    pub fn new(system: CodeSystem, code: impl Into<String>) -> Self {
        Self {
            system,
            code: code.into(),
            display: None,
        }
    }

    #[must_use]
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    #[must_use]
    pub fn icd10(code: impl Into<String>) -> Self {
        Self::new(CodeSystem::Icd10Cm, code)
    }

    #[must_use]
    pub fn cpt(code: impl Into<String>) -> Self {
        Self::new(CodeSystem::Cpt, code)
    }

    #[must_use]
    pub fn loinc(code: impl Into<String>) -> Self {
        Self::new(CodeSystem::Loinc, code)
    }

    /// Same system and code, ignoring display text.
    #[must_use]
    pub fn same_concept(&self, other: &Code) -> bool {
        self.system == other.system && self.code == other.code
    }

    /// ICD-10 code without the decimal point, as carried in X12 HI segments.
    #[must_use]
    pub fn compact(&self) -> String {
        self.code.replace('.', "")
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.system.hl7_mnemonic(), self.code)
    }
}
