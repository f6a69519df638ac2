//! X12 5010 interchange envelope shared by the 837P and 835 codecs.
//!
//! Three nested levels, each opened and closed with a matching control
//! number: `ISA`/`IEA` (interchange), `GS`/`GE` (functional group) and
//! `ST`/`SE` (transaction set). Closing segments also carry counts: `SE01`
//! is the number of segments from `ST` through `SE`, `GE01` the number of
//! transaction sets and `IEA01` the number of groups.

use std::iter;

use crate::text::{d8, fixed};
use crate::{CodecError, ExportOptions};

pub(crate) const ELEMENT: char = '*';
pub(crate) const SEGMENT: char = '~';
pub(crate) const COMPONENT: char = ':';
pub(crate) const REPETITION: char = '^';

/// Length of the fixed-width `ISA` segment including its terminator.
const ISA_LEN: usize = 106;

/// What a transaction set carries, stamped into `GS` and `ST`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransactionKind {
    pub functional_id: &'static str,
    pub set_id: &'static str,
    pub implementation: &'static str,
}

pub(crate) const PROFESSIONAL_CLAIM: TransactionKind = TransactionKind {
    functional_id: "HC",
    set_id: "837",
    implementation: "005010X222A1",
};

pub(crate) const REMITTANCE: TransactionKind = TransactionKind {
    functional_id: "HP",
    set_id: "835",
    implementation: "005010X221A1",
};

/// One segment as its id followed by its elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment(Vec<String>);

impl Segment {
    /// Build from the id and elements; trailing empty elements are dropped.
    pub(crate) fn new(id: &str, elements: &[&str]) -> Self {
        let mut parts: Vec<String> = iter::once(id.to_string())
            .chain(elements.iter().map(|element| clean(element)))
            .collect();
        while parts.len() > 1 && parts.last().is_some_and(String::is_empty) {
            parts.pop();
        }
        Self(parts)
    }

    pub(crate) fn id(&self) -> &str {
        &self.0[0]
    }

    /// Element `n`, 1-based as in the implementation guides. Empty when absent.
    pub(crate) fn element(&self, n: usize) -> &str {
        self.0.get(n).map_or("", String::as_str)
    }

    /// Components of element `n`.
    pub(crate) fn components(&self, n: usize) -> Vec<&str> {
        self.element(n).split(COMPONENT).collect()
    }

    fn render(&self) -> String {
        let mut line = self.0.join(&ELEMENT.to_string());
        line.push(SEGMENT);
        line.push('\n');
        line
    }
}

/// Delimiters cannot be escaped in X12, so they are blanked out of values.
fn clean(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if matches!(c, ELEMENT | SEGMENT | REPETITION) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Join components with the component separator, dropping trailing empties.
pub(crate) fn composite(parts: &[&str]) -> String {
    let mut parts: Vec<String> = parts
        .iter()
        .map(|part| clean(part).replace(COMPONENT, " "))
        .collect();
    while parts.len() > 1 && parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    parts.join(&COMPONENT.to_string())
}

/// Wrap transaction-set bodies in one interchange with one functional group.
///
/// Bodies exclude `ST` and `SE`; those are added here with sequential
/// control numbers starting at `0001`.
pub(crate) fn interchange(
    options: &ExportOptions,
    kind: TransactionKind,
    sender: &str,
    receiver: &str,
    sets: &[Vec<Segment>],
) -> String {
    let number = options.x12.control_number.unwrap_or(1);
    let control = format!("{number:09}");
    let group_control = number.to_string();
    let at = options.generated_at;

    let isa = [
        "ISA".to_string(),
        "00".to_string(),
        fixed("", 10),
        "00".to_string(),
        fixed("", 10),
        "ZZ".to_string(),
        fixed(&clean(sender), 15),
        "ZZ".to_string(),
        fixed(&clean(receiver), 15),
        at.format("%y%m%d").to_string(),
        at.format("%H%M").to_string(),
        REPETITION.to_string(),
        "00501".to_string(),
        control.clone(),
        "0".to_string(),
        "P".to_string(),
        COMPONENT.to_string(),
    ]
    .join(&ELEMENT.to_string());

    let mut out = isa;
    out.push(SEGMENT);
    out.push('\n');
    out.push_str(
        &Segment::new(
            "GS",
            &[
                kind.functional_id,
                sender,
                receiver,
                &d8(at.date()),
                &at.format("%H%M").to_string(),
                &group_control,
                "X",
                kind.implementation,
            ],
        )
        .render(),
    );

    for (index, body) in sets.iter().enumerate() {
        let set_control = format!("{:04}", index + 1);
        out.push_str(
            &Segment::new("ST", &[kind.set_id, &set_control, kind.implementation]).render(),
        );
        for segment in body {
            out.push_str(&segment.render());
        }
        let count = body.len() + 2;
        out.push_str(&Segment::new("SE", &[&count.to_string(), &set_control]).render());
    }

    out.push_str(&Segment::new("GE", &[&sets.len().to_string(), &group_control]).render());
    out.push_str(&Segment::new("IEA", &["1", &control]).render());
    out
}

/// A transaction set read back from an interchange, without `ST`/`SE`.
#[derive(Debug, Clone)]
pub(crate) struct TransactionSet {
    pub control: String,
    pub segments: Vec<Segment>,
}

struct OpenSet {
    control: String,
    segments: Vec<Segment>,
}

struct OpenGroup {
    control: String,
    sets: usize,
}

/// Split an interchange into transaction sets, checking that every level is
/// closed with its opening control number and the declared counts.
pub(crate) fn parse_interchange(
    codec: &'static str,
    bytes: &[u8],
) -> Result<Vec<TransactionSet>, CodecError> {
    let text = str::from_utf8(bytes)
        .map_err(|err| CodecError::malformed(codec, "interchange", err.to_string()))?;
    let text = text.trim_start();
    if !text.starts_with("ISA") || text.len() < ISA_LEN {
        return Err(CodecError::malformed(
            codec,
            "ISA",
            "interchange does not start with a fixed-width ISA segment",
        ));
    }
    let element = text.chars().nth(3).unwrap_or(ELEMENT);
    let terminator = text
        .chars()
        .nth(ISA_LEN - 1)
        .filter(|c| !c.is_alphanumeric())
        .ok_or_else(|| CodecError::malformed(codec, "ISA16", "missing segment terminator"))?;

    let mut interchange: Option<String> = None;
    let mut groups = 0usize;
    let mut group: Option<OpenGroup> = None;
    let mut set: Option<OpenSet> = None;
    let mut sets = Vec::new();
    let mut closed = false;

    for (index, raw) in text.split(terminator).enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let location = format!("segment {}", index + 1);
        if closed {
            return Err(CodecError::malformed(codec, location, "data after IEA"));
        }
        let parts: Vec<String> = raw.split(element).map(str::to_string).collect();
        let segment = Segment(parts);

        match segment.id() {
            "ISA" => {
                if interchange.is_some() {
                    return Err(CodecError::malformed(codec, location, "nested ISA"));
                }
                interchange = Some(segment.element(13).trim().to_string());
            }
            "GS" => {
                if interchange.is_none() || group.is_some() {
                    return Err(unbalanced("functional group", segment.element(6), "GS"));
                }
                group = Some(OpenGroup {
                    control: segment.element(6).to_string(),
                    sets: 0,
                });
            }
            "ST" => {
                if group.is_none() || set.is_some() {
                    return Err(unbalanced("transaction set", segment.element(2), "ST"));
                }
                set = Some(OpenSet {
                    control: segment.element(2).to_string(),
                    segments: Vec::new(),
                });
            }
            "SE" => {
                let Some(open) = set.take() else {
                    return Err(unbalanced("transaction set", "none", "SE"));
                };
                if segment.element(2) != open.control {
                    return Err(unbalanced(
                        "transaction set",
                        &format!("ST {}", open.control),
                        &format!("SE {}", segment.element(2)),
                    ));
                }
                let counted = open.segments.len() + 2;
                if segment.element(1) != counted.to_string() {
                    return Err(unbalanced(
                        "transaction set",
                        &format!("ST {} with {counted} segments", open.control),
                        &format!("SE declaring {}", segment.element(1)),
                    ));
                }
                if let Some(group) = group.as_mut() {
                    group.sets += 1;
                }
                sets.push(TransactionSet {
                    control: open.control,
                    segments: open.segments,
                });
            }
            "GE" => {
                if set.is_some() {
                    return Err(unbalanced("transaction set", "ST", "GE"));
                }
                let Some(open) = group.take() else {
                    return Err(unbalanced("functional group", "none", "GE"));
                };
                if segment.element(2) != open.control {
                    return Err(unbalanced(
                        "functional group",
                        &format!("GS {}", open.control),
                        &format!("GE {}", segment.element(2)),
                    ));
                }
                if segment.element(1) != open.sets.to_string() {
                    return Err(unbalanced(
                        "functional group",
                        &format!("GS {} with {} sets", open.control, open.sets),
                        &format!("GE declaring {}", segment.element(1)),
                    ));
                }
                groups += 1;
            }
            "IEA" => {
                if group.is_some() {
                    return Err(unbalanced("functional group", "GS", "IEA"));
                }
                let Some(control) = interchange.as_deref() else {
                    return Err(unbalanced("interchange", "none", "IEA"));
                };
                if segment.element(2) != control {
                    return Err(unbalanced(
                        "interchange",
                        &format!("ISA {control}"),
                        &format!("IEA {}", segment.element(2)),
                    ));
                }
                if segment.element(1) != groups.to_string() {
                    return Err(unbalanced(
                        "interchange",
                        &format!("ISA {control} with {groups} groups"),
                        &format!("IEA declaring {}", segment.element(1)),
                    ));
                }
                closed = true;
            }
            _ => match set.as_mut() {
                Some(open) => open.segments.push(segment),
                None => {
                    return Err(CodecError::malformed(
                        codec,
                        location,
                        format!("{} segment outside a transaction set", segment.id()),
                    ));
                }
            },
        }
    }

    if let Some(open) = set {
        return Err(unbalanced("transaction set", &format!("ST {}", open.control), "missing SE"));
    }
    if let Some(open) = group {
        return Err(unbalanced("functional group", &format!("GS {}", open.control), "missing GE"));
    }
    if !closed {
        let control = interchange.unwrap_or_default();
        return Err(unbalanced("interchange", &format!("ISA {control}"), "missing IEA"));
    }
    Ok(sets)
}

fn unbalanced(level: &'static str, opened: &str, closed: &str) -> CodecError {
    CodecError::UnbalancedEnvelope {
        level,
        opened: opened.to_string(),
        closed: closed.to_string(),
    }
}
