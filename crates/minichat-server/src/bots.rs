//! Scripted replies of the system bots.

use std::time::Duration;

use minichat_shared::bots::{AI_BOT, GAME_BOT, MUSIC_BOT, PREMIUM_BOT, QUOTE_BOT, SAVED, WEATHER_BOT};
use minichat_shared::constants::{BOT_REPLY_MAX_DELAY_MS, BOT_REPLY_MIN_DELAY_MS};
use rand::seq::SliceRandom;
use rand::Rng;

const QUOTES: &[(&str, &str)] = &[
    ("Be yourself; everyone else is already taken.", "Oscar Wilde"),
    (
        "Success is stumbling from failure to failure with no loss of enthusiasm.",
        "Winston Churchill",
    ),
    ("The only way to do great work is to love what you do.", "Steve Jobs"),
];

const RANDOM_TRACKS: &[&str] = &[
    "Daft Punk - Digital Love",
    "Massive Attack - Teardrop",
    "Portishead - Glory Box",
    "Radiohead - Weird Fishes",
    "Nujabes - Aruarian Dance",
];

const SLOT_SYMBOLS: &[&str] = &["🍒", "🍋", "💎", "7️⃣"];

/// How long a bot "thinks" before answering: uniform in `[500ms, 1500ms)`.
pub fn reply_delay(rng: &mut impl Rng) -> Duration {
    Duration::from_millis(rng.gen_range(BOT_REPLY_MIN_DELAY_MS..BOT_REPLY_MAX_DELAY_MS))
}

/// The reply `bot` gives to `text`. Matching is case-insensitive substring
/// matching on keywords and commands.
pub fn reply(bot: &str, text: &str, rng: &mut impl Rng) -> String {
    let t = text.to_lowercase();
    let has = |needle: &str| t.contains(needle);

    match bot {
        AI_BOT => {
            if has("hello") {
                "Hi! 👋 I'm the AI assistant. How can I help?".into()
            } else if has("help") {
                "I can:\n• Answer questions\n• Help with tasks\n• Give advice".into()
            } else if has("how are you") {
                "Great! Ready to help 24/7 💪".into()
            } else {
                "Interesting question! 🤔 Ask me something more specific.".into()
            }
        }
        GAME_BOT => {
            if has("/dice") {
                let n: u8 = rng.gen_range(1..=6);
                let verdict = if n >= 4 { "🎉 +10 ⭐!" } else { "😔 Try again!" };
                format!("🎲 You rolled: {n}\n{verdict}")
            } else if has("/coin") {
                if rng.gen_bool(0.5) {
                    "🪙 Heads! +5 ⭐".into()
                } else {
                    "🪙 Tails!".into()
                }
            } else if has("/slot") {
                let reels: Vec<&str> = (0..3)
                    .map(|_| SLOT_SYMBOLS.choose(rng).copied().unwrap_or("🍒"))
                    .collect();
                let jackpot = reels.windows(2).all(|w| w[0] == w[1]);
                let verdict = if jackpot { "🎉 JACKPOT! +100 ⭐" } else { "Try again!" };
                format!("🎰 {}\n{verdict}", reels.join(" | "))
            } else if has("hello") {
                "🎮 Hi!\n\nGames:\n• /dice - Dice\n• /coin - Coin flip\n• /slot - Slots".into()
            } else {
                "Send /dice, /coin or /slot! 🎮".into()
            }
        }
        MUSIC_BOT => {
            if has("/top") {
                "🔥 Top tracks:\n\n1. 🏆 Daft Punk - Get Lucky\n2. 🥈 The Weeknd - Blinding Lights\n3. 🥉 Dua Lipa - Levitating".into()
            } else if has("/random") {
                let track = RANDOM_TRACKS.choose(rng).copied().unwrap_or(RANDOM_TRACKS[0]);
                format!("🎲 {track}")
            } else if has("/rock") {
                "🎸 Rock:\n• Queen - Bohemian Rhapsody\n• Nirvana - Lithium\n• The Cure - Friday I'm in Love".into()
            } else if has("/pop") {
                "🎤 Pop:\n• Robyn - Dancing On My Own\n• ABBA - Dancing Queen\n• Lorde - Royals".into()
            } else if has("/rap") {
                "🎤 Rap:\n• Kendrick Lamar - HUMBLE.\n• Nas - N.Y. State of Mind\n• MF DOOM - Rapp Snitch Knishes".into()
            } else if has("hello") {
                "🎵 Hi, music lover!\n\nCommands:\n• /top - Top tracks\n• /random - Random track\n• /rock - Rock\n• /pop - Pop\n• /rap - Rap".into()
            } else {
                "🎵 Try /top, /random or a genre!".into()
            }
        }
        WEATHER_BOT => {
            if has("london") {
                let temp: i32 = rng.gen_range(-5..25);
                let wind: u32 = rng.gen_range(0..15);
                format!("🌧️ London:\n🌡️ {temp}°C\n💨 {wind} m/s")
            } else if has("berlin") {
                let temp: i32 = rng.gen_range(-10..20);
                let wind: u32 = rng.gen_range(0..10);
                format!("🌤️ Berlin:\n🌡️ {temp}°C\n💨 {wind} m/s")
            } else {
                "🌍 Send me a city (London, Berlin)!".into()
            }
        }
        QUOTE_BOT => {
            let (quote, author) = QUOTES.choose(rng).copied().unwrap_or(QUOTES[0]);
            format!("💬 «{quote}»\n— {author}")
        }
        PREMIUM_BOT => {
            if has("/benefits") {
                "👑 Premium:\n✓ No ads\n✓ Exclusive stickers\n✓ More wallpapers".into()
            } else if has("/price") {
                "💰 500 ⭐ / month\n4000 ⭐ / year".into()
            } else if has("hello") {
                "⭐ Premium Bot!\n\n• /benefits - What you get\n• /price - Pricing".into()
            } else {
                "⭐ /benefits or /price".into()
            }
        }
        SAVED => "⭐ Your Saved Messages! Forward anything important here.".into(),
        _ => "Bot is temporarily unavailable.".into(),
    }
}
