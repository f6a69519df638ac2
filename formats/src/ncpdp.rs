//! NCPDP Telecommunication D.0 claim response records.
//!
//! One record per adjudicated fill: the fixed-width transaction header keyed
//! by BIN and PCN, then the response status, claim, pricing and DUR segments.
//! Records are newline-separated so a batch file holds one per line.
//! Amounts use signed overpunch.

use healthsim_types::{
    EntitySet, FillStatus, IdentityProfile, Money, PharmacyOutcome, Prescription,
    ValidationReport,
};

use crate::text::{d8, fixed};
use crate::{Codec, CodecError, Export, ExportOptions};

const NAME: &str = "ncpdp-d0";
const VERSION: &str = "D0";
const BILLING: &str = "B1";
const SOFTWARE_VENDOR: &str = "HEALTHSIM";

const SEGMENT_SEPARATOR: char = '\u{1e}';
const GROUP_SEPARATOR: char = '\u{1d}';
const FIELD_SEPARATOR: char = '\u{1c}';

#[derive(Debug, Clone, Copy, Default)]
pub struct NcpdpD0;

/// Signed-overpunch rendering of a dollar amount in implied cents.
///
/// The last digit carries the sign: `{`, `A`..`I` for zero through nine when
/// positive, `}`, `J`..`R` when negative. `14.60` becomes `146{`.
#[must_use]
pub fn overpunch(amount: Money) -> String {
    const POSITIVE: [char; 10] = ['{', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I'];
    const NEGATIVE: [char; 10] = ['}', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R'];

    let cents = amount.cents();
    let digits = cents.unsigned_abs().to_string();
    let (head, last) = digits.split_at(digits.len() - 1);
    let last = last.bytes().next().map_or(0, |digit| usize::from(digit - b'0'));
    let table = if cents < 0 { NEGATIVE } else { POSITIVE };
    format!("{head}{}", table[last])
}

struct Record {
    out: String,
}

impl Record {
    fn new(header: String) -> Self {
        let mut out = header;
        out.push(GROUP_SEPARATOR);
        Self { out }
    }

    fn segment(&mut self, id: &str) -> &mut Self {
        self.out.push(SEGMENT_SEPARATOR);
        self.out.push(FIELD_SEPARATOR);
        self.out.push_str("AM");
        self.out.push_str(id);
        self
    }

    fn field(&mut self, id: &str, value: &str) -> &mut Self {
        self.out.push(FIELD_SEPARATOR);
        self.out.push_str(id);
        self.out.extend(value.chars().filter(|c| !c.is_control()));
        self
    }
}

impl Codec for NcpdpD0 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "NCPDP Telecommunication D.0 claim responses"
    }

    fn export(&self, entities: &EntitySet, options: &ExportOptions) -> Result<Export, CodecError> {
        let mut report = ValidationReport::new();
        let mut out = String::new();
        let mut records = 0usize;

        for fill in &entities.prescriptions {
            let subject = fill.id();
            let Some(outcome) = fill.outcome.as_ref() else {
                report.warn(subject, "outcome", "prescription has not been adjudicated");
                report.skip(subject, "no response without an adjudication outcome");
                continue;
            };
            let profile = entities
                .identity(fill.rx_member())
                .map(|identity| &identity.profile);
            let routing = match profile {
                Some(IdentityProfile::RxMember { bin, pcn, .. }) => Some((bin, pcn)),
                Some(_) => {
                    report.error(subject, "rx_member", "owner is not a pharmacy identity");
                    None
                }
                None => {
                    report.error(
                        subject,
                        "rx_member",
                        format!("pharmacy member {} is not in the set", fill.rx_member()),
                    );
                    None
                }
            };
            let provider = options
                .ncpdp
                .service_provider_id
                .as_deref()
                .unwrap_or(&fill.pharmacy_npi);
            report.require(subject, "201-B1 service provider id", provider);
            if let Some((bin, _)) = routing
                && (bin.len() != 6 || !bin.bytes().all(|b| b.is_ascii_digit()))
            {
                report.error(subject, "101-A1 BIN", "BIN must be six digits");
            }
            let Some((bin, pcn)) = routing else {
                report.admit(subject);
                continue;
            };
            if !report.admit(subject) {
                continue;
            }

            let header = [
                fixed(bin, 6),
                VERSION.to_string(),
                BILLING.to_string(),
                fixed(pcn, 10),
                "1".to_string(),
                "01".to_string(),
                fixed(provider, 15),
                d8(fill.fill_date),
                fixed(SOFTWARE_VENDOR, 10),
            ]
            .concat();
            out.push_str(&response(header, fill, outcome));
            out.push('\n');
            records += 1;
        }

        tracing::debug!(codec = NAME, records, "Built NCPDP responses");
        Ok(Export::single("responses.ncpdp", out, report))
    }
}

fn response(header: String, fill: &Prescription, outcome: &PharmacyOutcome) -> String {
    let mut record = Record::new(header);

    record.segment("20").field("AN", outcome.status.response_code());
    if let FillStatus::Rejected { code, message } = &outcome.status {
        record.field("FA", "1").field("FB", code).field("F4", message);
    }

    record
        .segment("22")
        .field("EM", "1")
        .field("D2", &fill.id().to_string())
        .field("E1", "03")
        .field("D7", &fill.drug.ndc);

    if let Some(pricing) = &outcome.pricing {
        record
            .segment("23")
            .field("F5", &overpunch(pricing.patient_pay))
            .field("F6", &overpunch(pricing.ingredient_cost))
            .field("F7", &overpunch(pricing.dispensing_fee))
            .field("F9", &overpunch(pricing.plan_paid))
            .field("FM", pricing.basis.ncpdp_code());
    }

    if !outcome.alerts.is_empty() {
        record.segment("24");
        for (index, alert) in outcome.alerts.iter().enumerate() {
            record
                .field("J6", &(index + 1).to_string())
                .field("E4", alert.kind.reason_for_service())
                .field("FS", alert.severity.clinical_significance())
                .field("FY", &alert.message.chars().take(30).collect::<String>());
        }
    }
    record.out
}

#[cfg(test)]
mod tests {
    use super::{NcpdpD0, overpunch};
    use crate::{Codec, Export, ExportOptions};
    use chrono::NaiveDate;
    use healthsim_config::PolicyProfile;
    use healthsim_engine::Adjudicator;
    use healthsim_types::{
        CorrelationKey, Drug, Entity, EntityId, EntityKind, EntitySet, IdentityProfile, Money,
        Prescription, ProductIdentity,
    };
    use rust_decimal::Decimal;

    fn id(kind: EntityKind, seq: u64) -> EntityId {
        EntityId::new(kind, seq).expect("id")
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).expect("valid date")
    }

    fn rx_member() -> ProductIdentity {
        ProductIdentity::new(
            id(EntityKind::RxMember, 1),
            id(EntityKind::Person, 1),
            CorrelationKey::generate(),
            "RX0001",
            date(1, 1),
            IdentityProfile::RxMember {
                bin: "610014".to_string(),
                pcn: "SIMRX".to_string(),
                rx_group: "GRP100".to_string(),
                plan_code: "PPO-GOLD".to_string(),
            },
        )
    }

    fn adjudicated(seq: u64, ndc: &str) -> Prescription {
        let mut fill = Prescription::new(
            id(EntityKind::Prescription, seq),
            id(EntityKind::RxMember, 1),
            Drug {
                ndc: ndc.to_string(),
                name: "clopidogrel 75 mg".to_string(),
            },
            Decimal::from(180),
            90,
            date(4, 1),
            Money::from_cents(1_850),
        );
        fill.pharmacy_npi = "1649271839".to_string();
        let profile = PolicyProfile::example().expect("example profile");
        Adjudicator::new(&profile)
            .adjudicate_prescription(&fill, Some(&rx_member()), &[], date(4, 1))
            .expect("covered")
    }

    fn visible(text: &str) -> String {
        text.replace('\u{1e}', "<SS>")
            .replace('\u{1d}', "<GS>")
            .replace('\u{1c}', "|")
    }

    fn export_fills(fills: Vec<Prescription>) -> Export {
        let mut set = EntitySet::new();
        set.insert(Entity::Identity(rx_member()));
        for fill in fills {
            set.insert(Entity::Prescription(fill));
        }
        let options = ExportOptions::new(date(4, 2).and_hms_opt(0, 0, 0).expect("valid time"));
        NcpdpD0.export(&set, &options).expect("export")
    }

    #[test]
    fn overpunch_signs_last_digit() {
        assert_eq!(overpunch(Money::from_cents(1_460)), "146{");
        assert_eq!(overpunch(Money::from_cents(1_000)), "100{");
        assert_eq!(overpunch(Money::from_cents(1_851)), "185A");
        assert_eq!(overpunch(Money::from_cents(-1_259)), "125R");
        assert_eq!(overpunch(Money::ZERO), "{");
    }

    #[test]
    fn paid_fill_carries_lesser_of_pricing() {
        let export = export_fills(vec![adjudicated(1, "00093717601")]);
        assert!(export.report.is_clean(), "{:?}", export.report);
        insta::assert_snapshot!(
            visible(export.text().trim_end()),
            @"610014D0B1SIMRX     1011649271839     20240401HEALTHSIM <GS><SS>|AM20|ANP<SS>|AM22|EM1|D2RX-000001|E103|D700093717601<SS>|AM23|F5100{|F6126{|F720{|F946{|FM01"
        );
    }

    #[test]
    fn off_formulary_fill_is_rejected_without_pricing() {
        let export = export_fills(vec![adjudicated(1, "99999999999")]);
        let text = visible(&export.text());
        assert!(text.contains("|AM20|ANR|FA1|FB70|F4"));
        assert!(!text.contains("AM23"));
    }

    #[test]
    fn unadjudicated_fill_is_skipped() {
        let mut fill = adjudicated(1, "00093717601");
        fill.outcome = None;
        let export = export_fills(vec![fill]);
        assert!(export.text().is_empty());
        assert_eq!(export.report.skipped()[0].subject, "RX-000001");
    }
}
