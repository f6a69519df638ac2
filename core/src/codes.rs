//! Terminology code format checks.
//!
//! Only the lexical shape of a code is checked; membership in the published
//! code set is not.

use std::sync::OnceLock;

use regex::Regex;

use healthsim_types::{Code, CodeSystem};

struct CodePatterns {
    icd10_cm: Regex,
    cpt: Regex,
    hcpcs: Regex,
    loinc: Regex,
    snomed: Regex,
    ndc: Regex,
    rxnorm: Regex,
}

impl CodePatterns {
    fn new() -> Self {
        Self {
            // Category, etiology, optional dotted extension. U is reserved.
            icd10_cm: Regex::new(r"^[A-TV-Z][0-9][0-9A-Z](?:\.[0-9A-Z]{1,4})?$")
                .expect("valid ICD-10-CM regex"),
            // Category I numeric, Category II `F`, Category III `T`.
            cpt: Regex::new(r"^[0-9]{4}[0-9FTU]$").expect("valid CPT regex"),
            hcpcs: Regex::new(r"^[A-V][0-9]{4}$").expect("valid HCPCS regex"),
            loinc: Regex::new(r"^[0-9]{1,5}-[0-9]$").expect("valid LOINC regex"),
            snomed: Regex::new(r"^[0-9]{6,18}$").expect("valid SNOMED CT regex"),
            // 11-digit normalized form, no hyphens.
            ndc: Regex::new(r"^[0-9]{11}$").expect("valid NDC regex"),
            rxnorm: Regex::new(r"^[0-9]{1,8}$").expect("valid RxNorm regex"),
        }
    }
}

static PATTERNS: OnceLock<CodePatterns> = OnceLock::new();

fn patterns() -> &'static CodePatterns {
    PATTERNS.get_or_init(CodePatterns::new)
}

/// Whether `code` has the lexical shape of its system.
#[must_use]
pub fn is_well_formed(code: &Code) -> bool {
    let value = code.code.as_str();
    let patterns = patterns();
    match code.system {
        CodeSystem::Icd10Cm => patterns.icd10_cm.is_match(value),
        CodeSystem::Cpt => patterns.cpt.is_match(value),
        CodeSystem::Hcpcs => patterns.hcpcs.is_match(value),
        CodeSystem::Loinc => patterns.loinc.is_match(value),
        CodeSystem::Snomed => patterns.snomed.is_match(value),
        CodeSystem::Ndc => patterns.ndc.is_match(value),
        CodeSystem::RxNorm => patterns.rxnorm.is_match(value),
        CodeSystem::Local => !value.trim().is_empty(),
    }
}

/// Whether `value` can be billed as a professional procedure (CPT or HCPCS).
#[must_use]
pub fn is_procedure_code(value: &str) -> bool {
    let patterns = patterns();
    patterns.cpt.is_match(value) || patterns.hcpcs.is_match(value)
}

#[must_use]
pub fn is_ndc(value: &str) -> bool {
    patterns().ndc.is_match(value)
}

/// Restore the dot in an ICD-10-CM code transmitted without one (`E119` to `E11.9`).
#[must_use]
pub fn icd10_with_decimal(compact: &str) -> String {
    let compact = compact.trim();
    if compact.contains('.') || compact.len() <= 3 || !compact.is_ascii() {
        return compact.to_string();
    }
    format!("{}.{}", &compact[..3], &compact[3..])
}
