//! SHA-256-crypt (`$5$`) and SHA-512-crypt (`$6$`) as found in
//! `/etc/shadow`, built on `sha2`.

use sha2::{Digest, Sha256, Sha512};

const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const SALT_MAX: usize = 16;
const ROUNDS_DEFAULT: u32 = 5000;
const ROUNDS_MIN: u32 = 1000;
const ROUNDS_MAX: u32 = 999_999_999;

/// Byte triples fed to the 24-bit encoder.
const SHA512_ORDER: [(usize, usize, usize); 21] = [
    (0, 21, 42),
    (22, 43, 1),
    (44, 2, 23),
    (3, 24, 45),
    (25, 46, 4),
    (47, 5, 26),
    (6, 27, 48),
    (28, 49, 7),
    (50, 8, 29),
    (9, 30, 51),
    (31, 52, 10),
    (53, 11, 32),
    (12, 33, 54),
    (34, 55, 13),
    (56, 14, 35),
    (15, 36, 57),
    (37, 58, 16),
    (59, 17, 38),
    (18, 39, 60),
    (40, 61, 19),
    (62, 20, 41),
];

const SHA256_ORDER: [(usize, usize, usize); 10] = [
    (0, 10, 20),
    (21, 1, 11),
    (12, 22, 2),
    (3, 13, 23),
    (24, 4, 14),
    (15, 25, 5),
    (6, 16, 26),
    (27, 7, 17),
    (18, 28, 8),
    (9, 19, 29),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Sha256,
    Sha512,
}

impl Scheme {
    fn id(&self) -> &'static str {
        match self {
            Scheme::Sha256 => "5",
            Scheme::Sha512 => "6",
        }
    }
}

/// Parsed `$id$[rounds=N$]salt$hash` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting<'a> {
    pub scheme: Scheme,
    pub rounds: Option<u32>,
    pub salt: &'a str,
}

/// `None` for anything that is not `$5$`/`$6$`.
pub fn parse_setting(hash: &str) -> Option<Setting<'_>> {
    let rest = hash.strip_prefix('$')?;
    let (id, rest) = rest.split_once('$')?;
    let scheme = match id {
        "5" => Scheme::Sha256,
        "6" => Scheme::Sha512,
        _ => return None,
    };

    let (rounds, rest) = match rest.strip_prefix("rounds=") {
        Some(after) => {
            let (value, rest) = after.split_once('$')?;
            let rounds: u32 = value.parse().ok()?;
            (Some(rounds.clamp(ROUNDS_MIN, ROUNDS_MAX)), rest)
        }
        None => (None, rest),
    };

    let salt = rest.split('$').next().unwrap_or_default();
    let salt = match salt.char_indices().nth(SALT_MAX) {
        Some((idx, _)) => &salt[..idx],
        None => salt,
    };

    Some(Setting {
        scheme,
        rounds,
        salt,
    })
}

/// Full crypt string for `password` under `setting`.
pub fn crypt(password: &str, setting: &Setting<'_>) -> String {
    let rounds = setting.rounds.unwrap_or(ROUNDS_DEFAULT);
    let encoded = match setting.scheme {
        Scheme::Sha512 => {
            let digest = digest_rounds::<Sha512>(password.as_bytes(), setting.salt.as_bytes(), rounds);
            encode(&digest, &SHA512_ORDER, (None, None, 63), 2)
        }
        Scheme::Sha256 => {
            let digest = digest_rounds::<Sha256>(password.as_bytes(), setting.salt.as_bytes(), rounds);
            encode(&digest, &SHA256_ORDER, (None, Some(31), 30), 3)
        }
    };

    match setting.rounds {
        Some(rounds) => format!(
            "${}$rounds={}${}${}",
            setting.scheme.id(),
            rounds,
            setting.salt,
            encoded
        ),
        None => format!("${}${}${}", setting.scheme.id(), setting.salt, encoded),
    }
}

/// Recompute `stored` from `password` and compare in constant time.
/// Returns `None` when `stored` is not a supported setting.
pub fn verify(password: &str, stored: &str) -> Option<bool> {
    let setting = parse_setting(stored)?;
    let computed = crypt(password, &setting);
    Some(constant_time_eq(computed.as_bytes(), stored.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn repeat_to(block: &[u8], len: usize) -> Vec<u8> {
    block.iter().copied().cycle().take(len).collect()
}

fn digest_rounds<D: Digest>(password: &[u8], salt: &[u8], rounds: u32) -> Vec<u8> {
    let hash_len = <D as Digest>::output_size();

    let mut alt = D::new();
    alt.update(password);
    alt.update(salt);
    alt.update(password);
    let alt = alt.finalize();

    let mut ctx = D::new();
    ctx.update(password);
    ctx.update(salt);

    let mut remaining = password.len();
    while remaining > hash_len {
        ctx.update(&alt);
        remaining -= hash_len;
    }
    ctx.update(&alt[..remaining]);

    let mut bits = password.len();
    while bits > 0 {
        if bits & 1 == 1 {
            ctx.update(&alt);
        } else {
            ctx.update(password);
        }
        bits >>= 1;
    }
    let mut current = ctx.finalize().to_vec();

    let mut dp = D::new();
    for _ in 0..password.len() {
        dp.update(password);
    }
    let p_bytes = repeat_to(&dp.finalize(), password.len());

    let mut ds = D::new();
    for _ in 0..(16 + current[0] as usize) {
        ds.update(salt);
    }
    let s_bytes = repeat_to(&ds.finalize(), salt.len());

    for round in 0..rounds {
        let mut ctx = D::new();
        if round & 1 == 1 {
            ctx.update(&p_bytes);
        } else {
            ctx.update(&current);
        }
        if round % 3 != 0 {
            ctx.update(&s_bytes);
        }
        if round % 7 != 0 {
            ctx.update(&p_bytes);
        }
        if round & 1 == 1 {
            ctx.update(&current);
        } else {
            ctx.update(&p_bytes);
        }
        current = ctx.finalize().to_vec();
    }

    current
}

/// The tail group uses literal zeros for its unused high bytes.
fn encode(
    digest: &[u8],
    order: &[(usize, usize, usize)],
    tail: (Option<usize>, Option<usize>, usize),
    tail_chars: usize,
) -> String {
    let mut out = String::with_capacity(order.len() * 4 + tail_chars);
    for &(b2, b1, b0) in order {
        push_24bit(&mut out, digest[b2], digest[b1], digest[b0], 4);
    }

    let byte = |idx: Option<usize>| idx.map(|i| digest[i]).unwrap_or(0);
    push_24bit(&mut out, byte(tail.0), byte(tail.1), digest[tail.2], tail_chars);
    out
}

fn push_24bit(out: &mut String, b2: u8, b1: u8, b0: u8, chars: usize) {
    let mut w = ((b2 as u32) << 16) | ((b1 as u32) << 8) | b0 as u32;
    for _ in 0..chars {
        out.push(ITOA64[(w & 0x3f) as usize] as char);
        w >>= 6;
    }
}
