// =============================================================================
// Terminal commands — one line of stdin -> one typed command
// =============================================================================
//
//   buy <SYM> <amount>     sell <SYM> <amount>
//   speed <seconds>        start [SYM ...]
//   coins   status   leaderboard   ack   help   quit
// =============================================================================

use anyhow::{bail, Context, Result};

use crate::types::TradeDirection;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Trade {
        coin: String,
        direction: TradeDirection,
        amount: f64,
    },
    Speed(f64),
    /// Empty list means every symbol the server offers.
    Start(Vec<String>),
    Coins,
    Status,
    Leaderboard,
    Ack,
    Help,
    Quit,
}

pub const HELP: &str = "commands: buy <SYM> <amount> | sell <SYM> <amount> | speed <secs> | \
start [SYM ...] | coins | status | leaderboard | ack | quit";

impl std::str::FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            bail!("empty command");
        };
        let args: Vec<&str> = words.collect();

        let cmd = match head.to_lowercase().as_str() {
            "buy" | "sell" => {
                let direction = if head.eq_ignore_ascii_case("buy") {
                    TradeDirection::Buy
                } else {
                    TradeDirection::Sell
                };
                let [coin, amount] = args.as_slice() else {
                    bail!("usage: {head} <SYM> <amount>");
                };
                let amount: f64 = amount
                    .parse()
                    .with_context(|| format!("amount {amount:?} is not a number"))?;
                Command::Trade {
                    coin: coin.to_uppercase(),
                    direction,
                    amount,
                }
            }
            "speed" => {
                let [secs] = args.as_slice() else {
                    bail!("usage: speed <seconds>");
                };
                Command::Speed(
                    secs.parse()
                        .with_context(|| format!("speed {secs:?} is not a number"))?,
                )
            }
            "start" => Command::Start(args.iter().map(|s| s.to_uppercase()).collect()),
            "coins" => Command::Coins,
            "status" => Command::Status,
            "leaderboard" | "top" => Command::Leaderboard,
            "ack" | "ok" => Command::Ack,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => bail!("unknown command {other:?}"),
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trades() {
        assert_eq!(
            "buy btc 100".parse::<Command>().unwrap(),
            Command::Trade {
                coin: "BTC".into(),
                direction: TradeDirection::Buy,
                amount: 100.0
            }
        );
        assert_eq!(
            "  SELL eth 2.5 ".parse::<Command>().unwrap(),
            Command::Trade {
                coin: "ETH".into(),
                direction: TradeDirection::Sell,
                amount: 2.5
            }
        );
    }

    #[test]
    fn rejects_bad_trades() {
        assert!("buy btc".parse::<Command>().is_err());
        assert!("buy btc lots".parse::<Command>().is_err());
        assert!("buy btc 1 2".parse::<Command>().is_err());
    }

    #[test]
    fn parses_other_commands() {
        assert_eq!("speed 0.25".parse::<Command>().unwrap(), Command::Speed(0.25));
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start(vec![]));
        assert_eq!(
            "start btc sol".parse::<Command>().unwrap(),
            Command::Start(vec!["BTC".into(), "SOL".into()])
        );
        assert_eq!("q".parse::<Command>().unwrap(), Command::Quit);
        assert_eq!("ack".parse::<Command>().unwrap(), Command::Ack);
        assert_eq!("top".parse::<Command>().unwrap(), Command::Leaderboard);
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert!("".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("speed".parse::<Command>().is_err());
    }
}
