// ABOUTME: Deterministic anonymization of sensitive column values
// ABOUTME: Same input always maps to the same fake output, preserving referential integrity

use crate::schema::{Row, SchemaGraph, SqlValue};
use fake::faker::address::en::{CityName, StreetName, ZipCode};
use fake::faker::chrono::en::Date as FakeDate;
use fake::faker::company::en::CompanyName;
use fake::faker::creditcard::en::CreditCardNumber;
use fake::faker::finance::en::Bic;
use fake::faker::internet::en::{IPv4, IPv6, MACAddress, SafeEmail, Username};
use fake::faker::job::en::Title as JobTitle;
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const DEFAULT_ANONYMIZATION_SEED: &str = "dbslice-default-seed";

/// Which Faker-style generator a column name maps to, checked against the
/// lowercased column name as a substring match, first match wins. Mirrors
/// the original implementation's pattern table, ordered the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeKind {
    Email,
    Phone,
    Name,
    FirstName,
    LastName,
    Street,
    City,
    ZipCode,
    Company,
    JobTitle,
    Username,
    Ipv4,
    Ipv6,
    Ssn,
    Passport,
    DriverLicense,
    CreditCard,
    MacAddress,
    Iban,
    BankAccount,
    RoutingNumber,
    Swift,
    Salary,
    Url,
    Website,
    Domain,
    Dob,
    RandomString,
}

const PATTERNS: &[(&str, FakeKind)] = &[
    ("email", FakeKind::Email),
    ("phone", FakeKind::Phone),
    ("mobile", FakeKind::Phone),
    ("fax", FakeKind::Phone),
    ("firstname", FakeKind::FirstName),
    ("first_name", FakeKind::FirstName),
    ("lastname", FakeKind::LastName),
    ("last_name", FakeKind::LastName),
    ("fullname", FakeKind::Name),
    ("full_name", FakeKind::Name),
    ("name", FakeKind::Name),
    ("mac_address", FakeKind::MacAddress),
    ("macaddress", FakeKind::MacAddress),
    ("street", FakeKind::Street),
    ("address", FakeKind::Street),
    ("city", FakeKind::City),
    ("zipcode", FakeKind::ZipCode),
    ("zip", FakeKind::ZipCode),
    ("postal", FakeKind::ZipCode),
    ("company", FakeKind::Company),
    ("organization", FakeKind::Company),
    ("employer", FakeKind::Company),
    ("job_title", FakeKind::JobTitle),
    ("username", FakeKind::Username),
    ("user_name", FakeKind::Username),
    ("ip_address", FakeKind::Ipv4),
    ("ipaddress", FakeKind::Ipv4),
    ("ipv6", FakeKind::Ipv6),
    ("ssn", FakeKind::Ssn),
    ("social_security", FakeKind::Ssn),
    ("passport", FakeKind::Passport),
    ("driver_license", FakeKind::DriverLicense),
    ("driverslicense", FakeKind::DriverLicense),
    ("license_number", FakeKind::DriverLicense),
    ("credit_card", FakeKind::CreditCard),
    ("creditcard", FakeKind::CreditCard),
    ("card_number", FakeKind::CreditCard),
    ("iban", FakeKind::Iban),
    ("bank_account", FakeKind::BankAccount),
    ("bankaccount", FakeKind::BankAccount),
    ("account_number", FakeKind::BankAccount),
    ("routing_number", FakeKind::RoutingNumber),
    ("routingnumber", FakeKind::RoutingNumber),
    ("swift", FakeKind::Swift),
    ("salary", FakeKind::Salary),
    ("website", FakeKind::Website),
    ("domain", FakeKind::Domain),
    ("url", FakeKind::Url),
    ("date_of_birth", FakeKind::Dob),
    ("birthdate", FakeKind::Dob),
    ("birth_date", FakeKind::Dob),
    ("dob", FakeKind::Dob),
];

/// Columns whose values are set to NULL rather than faked, regardless of
/// whether they'd otherwise match a pattern above.
const SECURITY_NULL_PATTERNS: &[&str] = &[
    "password", "passwd", "pwd", "hash", "salt", "token", "secret", "api_key", "apikey",
    "access_token", "refresh_token", "oauth_token", "csrf_token", "session_id", "private_key",
    "privatekey", "public_key", "publickey", "encryption_key", "decrypt_key", "nonce",
    "signature", "certificate", "client_secret", "oauth_secret",
];

/// Anonymizes values deterministically: the same (seed, column, value)
/// triple always produces the same output, so the same customer id
/// anonymized in two different tables still looks like the same customer.
///
/// Foreign key columns are never anonymized, since doing so would break the
/// referential integrity the rest of the crate works to preserve.
pub struct DeterministicAnonymizer<'a> {
    global_seed: String,
    cache: Mutex<HashMap<(String, String), SqlValue>>,
    redact_fields: HashSet<String>,
    schema: Option<&'a SchemaGraph>,
    fk_columns_cache: Mutex<HashMap<String, HashSet<String>>>,
}

impl<'a> DeterministicAnonymizer<'a> {
    pub fn new(seed: impl Into<String>, schema: Option<&'a SchemaGraph>) -> Self {
        let seed = seed.into();
        tracing::info!(seed = %truncate(&seed, 20), "initializing anonymizer");
        DeterministicAnonymizer {
            global_seed: seed,
            cache: Mutex::new(HashMap::new()),
            redact_fields: HashSet::new(),
            schema,
            fk_columns_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn configure(&mut self, redact_fields: Vec<String>) {
        tracing::info!(count = redact_fields.len(), "anonymizer configured");
        self.redact_fields = redact_fields.into_iter().collect();
    }

    fn is_foreign_key_column(&self, table: &str, column: &str) -> bool {
        let Some(schema) = self.schema else {
            return false;
        };
        let mut cache = self.fk_columns_cache.lock().unwrap();
        let fk_columns = cache.entry(table.to_string()).or_insert_with(|| {
            schema
                .get_table(table)
                .map(|t| {
                    t.foreign_keys
                        .iter()
                        .flat_map(|fk| fk.source_columns.iter().cloned())
                        .collect()
                })
                .unwrap_or_default()
        });
        fk_columns.contains(column)
    }

    pub fn should_anonymize(&self, table: &str, column: &str) -> bool {
        if self.is_foreign_key_column(table, column) {
            return false;
        }

        let full_name = format!("{}.{}", table, column);
        if self.redact_fields.contains(&full_name) {
            return true;
        }

        let col_lower = column.to_lowercase();
        PATTERNS.iter().any(|(pattern, _)| col_lower.contains(pattern))
    }

    pub fn should_null(&self, column: &str) -> bool {
        let col_lower = column.to_lowercase();
        SECURITY_NULL_PATTERNS.iter().any(|p| col_lower.contains(p))
    }

    fn fake_kind_for(&self, column: &str) -> FakeKind {
        let col_lower = column.to_lowercase();
        PATTERNS
            .iter()
            .find(|(pattern, _)| col_lower.contains(pattern))
            .map(|(_, kind)| *kind)
            .unwrap_or(FakeKind::RandomString)
    }

    /// Anonymizes a single value, consulting and populating the cache.
    pub fn anonymize_value(&self, value: &SqlValue, table: &str, column: &str) -> SqlValue {
        if value.is_null() {
            return SqlValue::Null;
        }

        if self.should_null(column) {
            return SqlValue::Null;
        }

        if !self.should_anonymize(table, column) {
            return value.clone();
        }

        let cache_key = (value.to_string(), column.to_string());
        if let Some(cached) = self.cache.lock().unwrap().get(&cache_key) {
            return cached.clone();
        }

        let hash_input = format!("{}:{}:{}", self.global_seed, column, value);
        let digest = Sha256::digest(hash_input.as_bytes());
        let seed_int = u64::from_be_bytes(digest[..8].try_into().unwrap());
        let mut rng = StdRng::seed_from_u64(seed_int);

        let anonymized = SqlValue::Text(generate_fake(self.fake_kind_for(column), &mut rng));

        self.cache
            .lock()
            .unwrap()
            .insert(cache_key, anonymized.clone());
        anonymized
    }

    pub fn anonymize_row(&self, table: &str, row: &Row) -> Row {
        let mut anonymized_count = 0;
        let mut result = Row::with_capacity(row.len());

        for (column, value) in row {
            let anonymized = self.anonymize_value(value, table, column);
            if &anonymized != value {
                anonymized_count += 1;
            }
            result.insert(column.clone(), anonymized);
        }

        if anonymized_count > 0 {
            tracing::debug!(
                table,
                anonymized_fields = anonymized_count,
                total_fields = row.len(),
                "anonymized row"
            );
        }

        result
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

fn generate_fake(kind: FakeKind, rng: &mut StdRng) -> String {
    match kind {
        FakeKind::Email => SafeEmail().fake_with_rng(rng),
        FakeKind::Phone => PhoneNumber().fake_with_rng(rng),
        FakeKind::Name => Name().fake_with_rng(rng),
        FakeKind::FirstName => FirstName().fake_with_rng(rng),
        FakeKind::LastName => LastName().fake_with_rng(rng),
        FakeKind::Street => StreetName().fake_with_rng(rng),
        FakeKind::City => CityName().fake_with_rng(rng),
        FakeKind::ZipCode => ZipCode().fake_with_rng(rng),
        FakeKind::Company => CompanyName().fake_with_rng(rng),
        FakeKind::JobTitle => JobTitle().fake_with_rng(rng),
        FakeKind::Username => Username().fake_with_rng(rng),
        FakeKind::Ipv4 => IPv4().fake_with_rng(rng),
        FakeKind::Ipv6 => IPv6().fake_with_rng(rng),
        FakeKind::Ssn => format!(
            "{}-{}-{}",
            random_digits(rng, 3),
            random_digits(rng, 2),
            random_digits(rng, 4)
        ),
        FakeKind::Passport => random_digits(rng, 9),
        FakeKind::DriverLicense => format!("D{}", random_digits(rng, 8)),
        FakeKind::CreditCard => CreditCardNumber().fake_with_rng(rng),
        FakeKind::MacAddress => MACAddress().fake_with_rng(rng),
        FakeKind::Iban => format!(
            "{}{}{}",
            random_letters(rng, 2),
            random_digits(rng, 2),
            random_digits(rng, 16)
        ),
        FakeKind::BankAccount => random_digits(rng, 10),
        FakeKind::RoutingNumber => random_digits(rng, 9),
        FakeKind::Swift => Bic().fake_with_rng(rng),
        FakeKind::Salary => (rng.gen_range(30_000..=250_000) as i64).to_string(),
        FakeKind::Url => format!("https://{}.example.com/{}", random_letters(rng, 8).to_lowercase(), random_digits(rng, 4)),
        FakeKind::Website => format!("https://{}.example.com", random_letters(rng, 10).to_lowercase()),
        FakeKind::Domain => format!("{}.example.com", random_letters(rng, 8).to_lowercase()),
        FakeKind::Dob => {
            let date: chrono::NaiveDate = FakeDate().fake_with_rng(rng);
            date.format("%Y-%m-%d").to_string()
        }
        FakeKind::RandomString => (0..12).map(|_| rng.gen_range('a'..='z')).collect(),
    }
}

fn random_digits(rng: &mut StdRng, n: usize) -> String {
    (0..n).map(|_| rng.gen_range('0'..='9')).collect()
}

fn random_letters(rng: &mut StdRng, n: usize) -> String {
    (0..n).map(|_| rng.gen_range('A'..='Z')).collect()
}

fn truncate(s: &str, n: usize) -> String {
    if s.len() <= n {
        s.to_string()
    } else {
        format!("{}...", &s[..n])
    }
}
