//! HL7 v2.5.1 messages.
//!
//! One `ADT^A01` per encounter and one `ORU^R01` per encounter that has
//! observations. Segments end with a carriage return; delimiters come from
//! [`Hl7Config`] and text is escaped against whichever set is configured.

use healthsim_config::Hl7Config;
use healthsim_types::{
    Code, Encounter, EntitySet, Observation, Person, ProductIdentity, ValidationReport,
};

use crate::text::{d8, decimal, ts};
use crate::{Codec, CodecError, Export, ExportOptions};

const NAME: &str = "hl7v2";
const VERSION: &str = "2.5.1";
const SEGMENT_END: char = '\r';

#[derive(Debug, Clone, Copy, Default)]
pub struct Hl7V2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Delimiters {
    field: char,
    component: char,
    repetition: char,
    escape: char,
    subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    fn from_config(config: &Hl7Config) -> Option<Self> {
        let chars: Vec<char> = config.encoding_characters.chars().collect();
        let [component, repetition, escape, subcomponent] = chars.as_slice() else {
            return None;
        };
        let delimiters = Self {
            field: config.field_separator,
            component: *component,
            repetition: *repetition,
            escape: *escape,
            subcomponent: *subcomponent,
        };
        let all = [
            delimiters.field,
            delimiters.component,
            delimiters.repetition,
            delimiters.escape,
            delimiters.subcomponent,
        ];
        let distinct = all
            .iter()
            .enumerate()
            .all(|(i, c)| !all[..i].contains(c) && !c.is_alphanumeric() && *c != SEGMENT_END);
        distinct.then_some(delimiters)
    }

    fn encoding_characters(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .into_iter()
            .collect()
    }

    /// Escape delimiter characters inside a text value.
    fn escape(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            let code = if c == self.escape {
                Some('E')
            } else if c == self.field {
                Some('F')
            } else if c == self.component {
                Some('S')
            } else if c == self.repetition {
                Some('R')
            } else if c == self.subcomponent {
                Some('T')
            } else {
                None
            };
            match code {
                Some(code) => {
                    out.push(self.escape);
                    out.push(code);
                    out.push(self.escape);
                }
                None if c == SEGMENT_END || c == '\n' => out.push(' '),
                None => out.push(c),
            }
        }
        out
    }

    fn components(&self, parts: &[&str]) -> String {
        let escaped: Vec<String> = parts.iter().map(|part| self.escape(part)).collect();
        let mut joined = escaped.join(&self.component.to_string());
        while joined.ends_with(self.component) {
            joined.pop();
        }
        joined
    }

    fn coded(&self, code: &Code) -> String {
        self.components(&[
            &code.code,
            code.display.as_deref().unwrap_or_default(),
            code.system.hl7_mnemonic(),
        ])
    }
}

/// Builds one segment field by field, trimming empty trailing fields.
struct Segment {
    fields: Vec<String>,
}

impl Segment {
    fn new(id: &str) -> Self {
        Self {
            fields: vec![id.to_string()],
        }
    }

    /// Set field `n` (1-based, as numbered in the standard).
    fn set(mut self, n: usize, value: impl Into<String>) -> Self {
        if self.fields.len() <= n {
            self.fields.resize(n + 1, String::new());
        }
        self.fields[n] = value.into();
        self
    }

    fn render(mut self, delimiters: &Delimiters) -> String {
        while self.fields.len() > 1 && self.fields.last().is_some_and(String::is_empty) {
            self.fields.pop();
        }
        let mut line = self.fields.join(&delimiters.field.to_string());
        line.push(SEGMENT_END);
        line
    }
}

struct MessageContext<'a> {
    delimiters: Delimiters,
    options: &'a ExportOptions,
    person: &'a Person,
    identity: &'a ProductIdentity,
    encounter: &'a Encounter,
}

impl MessageContext<'_> {
    fn msh(&self, message_type: &str, control_id: &str) -> String {
        // MSH-1 is the field separator itself, so MSH-2 lands at index 1.
        let d = &self.delimiters;
        Segment::new("MSH")
            .set(1, d.encoding_characters())
            .set(2, d.escape(&self.options.hl7.sending_application))
            .set(3, d.escape(self.encounter.facility.as_deref().unwrap_or_default()))
            .set(4, d.escape(&self.options.payer_id))
            .set(6, ts(self.options.generated_at))
            .set(8, message_type)
            .set(9, control_id)
            .set(10, "P")
            .set(11, VERSION)
            .render(d)
    }

    fn pid(&self) -> String {
        let d = &self.delimiters;
        let identifiers = [
            d.components(&[&self.identity.local_id, "", "", "HEALTHSIM", "MR"]),
            d.components(&[&self.identity.id().to_string(), "", "", "HEALTHSIM", "PI"]),
        ]
        .join(&d.repetition.to_string());
        let address = &self.person.address;
        Segment::new("PID")
            .set(1, "1")
            .set(3, identifiers)
            .set(
                5,
                d.components(&[&self.person.name.family, &self.person.name.given]),
            )
            .set(7, d8(self.person.birth_date))
            .set(8, self.person.sex.letter())
            .set(
                11,
                d.components(&[
                    &address.line,
                    "",
                    &address.city,
                    &address.state,
                    &address.postal_code,
                ]),
            )
            .render(d)
    }
}

impl Codec for Hl7V2 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "HL7 v2.5.1 ADT^A01 and ORU^R01 messages"
    }

    fn export(&self, entities: &EntitySet, options: &ExportOptions) -> Result<Export, CodecError> {
        let mut report = ValidationReport::new();
        let delimiters = Delimiters::from_config(&options.hl7).unwrap_or_else(|| {
            report.warn(
                "hl7",
                "encoding_characters",
                "configured delimiters are not four distinct punctuation characters; using defaults",
            );
            Delimiters::default()
        });

        let mut out = String::new();
        let mut messages = 0usize;
        let mut emitted = Vec::new();
        for encounter in &entities.encounters {
            let subject = encounter.id();
            let identity = entities.identity(encounter.patient());
            let person = identity.and_then(|identity| entities.person(identity.person()));
            match person {
                Some(person) => {
                    report.require(subject, "PID-5 family name", &person.name.family);
                }
                None => report.error(
                    subject,
                    "PID",
                    format!("patient {} is not in the set", encounter.patient()),
                ),
            }
            let (Some(identity), Some(person)) = (identity, person) else {
                report.admit(subject);
                continue;
            };
            if !report.admit(subject) {
                continue;
            }

            let context = MessageContext {
                delimiters,
                options,
                person,
                identity,
                encounter,
            };
            out.push_str(&admit_message(&context));
            messages += 1;
            emitted.push(subject);

            let observations: Vec<&Observation> = entities
                .observations
                .iter()
                .filter(|observation| observation.encounter == Some(subject))
                .collect();
            if !observations.is_empty() {
                out.push_str(&result_message(&context, &observations));
                messages += 1;
            }
        }

        for observation in &entities.observations {
            let reason = match observation.encounter {
                None => "observation is not attached to an encounter".to_string(),
                Some(encounter) if emitted.contains(&encounter) => continue,
                Some(encounter) if entities.encounter(encounter).is_none() => {
                    format!("encounter {encounter} is not in the set")
                }
                Some(encounter) => format!("encounter {encounter} was skipped"),
            };
            report.warn(observation.id(), "encounter", reason);
            report.skip(observation.id(), "ORU^R01 messages are built per encounter");
        }

        tracing::debug!(codec = NAME, messages, "Built HL7 v2 messages");
        Ok(Export::single("messages.hl7", out, report))
    }
}

fn admit_message(context: &MessageContext<'_>) -> String {
    let d = &context.delimiters;
    let encounter = context.encounter;
    let control_id = format!("{}-ADT", encounter.id());
    let mut message = context.msh(&d.components(&["ADT", "A01", "ADT_A01"]), &control_id);
    message.push_str(
        &Segment::new("EVN")
            .set(1, "A01")
            .set(2, ts(encounter.start))
            .render(d),
    );
    message.push_str(&context.pid());
    message.push_str(
        &Segment::new("PV1")
            .set(1, "1")
            .set(2, encounter.class.patient_class())
            .set(3, d.escape(encounter.facility.as_deref().unwrap_or_default()))
            .set(19, encounter.id().to_string())
            .set(44, ts(encounter.start))
            .set(45, encounter.end.map(ts).unwrap_or_default())
            .render(d),
    );
    for (rank, diagnosis) in encounter.diagnoses.iter().enumerate() {
        message.push_str(
            &Segment::new("DG1")
                .set(1, (rank + 1).to_string())
                .set(3, d.coded(diagnosis))
                .set(5, ts(encounter.start))
                .set(6, if rank == 0 { "A" } else { "W" })
                .set(15, (rank + 1).to_string())
                .render(d),
        );
    }
    for (n, procedure) in encounter.procedures.iter().enumerate() {
        message.push_str(
            &Segment::new("PR1")
                .set(1, (n + 1).to_string())
                .set(3, d.coded(procedure))
                .set(5, ts(encounter.start))
                .render(d),
        );
    }
    message
}

fn result_message(context: &MessageContext<'_>, observations: &[&Observation]) -> String {
    let d = &context.delimiters;
    let encounter = context.encounter;
    let control_id = format!("{}-ORU", encounter.id());
    let mut message = context.msh(&d.components(&["ORU", "R01", "ORU_R01"]), &control_id);
    message.push_str(&context.pid());
    message.push_str(
        &Segment::new("PV1")
            .set(1, "1")
            .set(2, encounter.class.patient_class())
            .set(19, encounter.id().to_string())
            .render(d),
    );
    let collected = observations
        .iter()
        .map(|observation| observation.effective)
        .min()
        .unwrap_or(encounter.start);
    message.push_str(
        &Segment::new("OBR")
            .set(1, "1")
            .set(2, encounter.id().to_string())
            .set(4, d.components(&["RESULTS", "Observation results", "L"]))
            .set(7, ts(collected))
            .set(25, "F")
            .render(d),
    );
    for (n, observation) in observations.iter().enumerate() {
        let range = observation
            .reference_range
            .as_ref()
            .map(|range| d.escape(&range.to_hl7()))
            .unwrap_or_default();
        let flag = observation
            .interpretation()
            .map(|interpretation| interpretation.code())
            .unwrap_or_default();
        message.push_str(
            &Segment::new("OBX")
                .set(1, (n + 1).to_string())
                .set(2, "NM")
                .set(3, d.coded(&observation.code))
                .set(5, decimal(observation.value.value))
                .set(6, d.escape(&observation.value.unit))
                .set(7, range)
                .set(8, flag)
                .set(11, "F")
                .set(14, ts(observation.effective))
                .set(21, observation.id().to_string())
                .render(d),
        );
    }
    message
}
