//! USI protocol loop: command parsing, option handling and the
//! handler the search reports through.

use anyhow::Result;
use kawasemi_core::handler::{DisplayScore, ScoreBound, SearchHandler, SearchInfo};
use kawasemi_core::limits::{Limiter, TimeLimits, TimeManager};
use kawasemi_core::score::MAX_DEPTH;
use kawasemi_core::search::{
    Searcher, DEFAULT_MULTI_PV, DEFAULT_THREAD_COUNT, THREAD_COUNT_RANGE,
};
use kawasemi_core::shogi::{Color, Move, Position};
use kawasemi_core::tt::{DEFAULT_TT_SIZE_MIB, TT_SIZE_RANGE};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

const NAME: &str = "Kawasemi";
const AUTHOR: &str = "the Kawasemi developers";

const DEFAULT_MOVE_OVERHEAD_MS: u64 = 10;
const MOVE_OVERHEAD_RANGE: (u64, u64) = (0, 5000);
const MULTI_PV_RANGE: (u32, u32) = (1, 256);

/// Write one protocol line, flushed immediately; the engine may be
/// talking to a pipe.
fn emit(line: &str) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    let _ = writeln!(lock, "{line}");
    let _ = lock.flush();
}

struct UsiOutput;

impl SearchHandler for UsiOutput {
    fn print_search_info(&self, info: &SearchInfo) {
        let mut line = format!("info depth {}", info.depth);

        if let Some(seldepth) = info.seldepth {
            line.push_str(&format!(" seldepth {seldepth}"));
        }

        if info.multi_pv > 1 {
            line.push_str(&format!(" multipv {}", info.pv_idx + 1));
        }

        if let Some(time) = info.time_sec {
            line.push_str(&format!(" time {}", (time * 1000.0) as u64));
        }

        line.push_str(&format!(" nodes {}", info.nodes));

        if let Some(time) = info.time_sec {
            if time > 0.0 {
                line.push_str(&format!(" nps {}", (info.nodes as f64 / time) as u64));
            }
        }

        match info.score {
            DisplayScore::Cp(score) => line.push_str(&format!(" score cp {score}")),
            DisplayScore::Mate(plies) => line.push_str(&format!(" score mate {plies}")),
        }

        match info.score_bound {
            ScoreBound::Exact => {}
            ScoreBound::UpperBound => line.push_str(" upperbound"),
            ScoreBound::LowerBound => line.push_str(" lowerbound"),
        }

        if let Some(hashfull) = info.hashfull {
            line.push_str(&format!(" hashfull {hashfull}"));
        }

        line.push_str(" pv");
        for mv in info.pv.iter() {
            line.push_str(&format!(" {mv}"));
        }

        emit(&line);
    }

    fn print_info_string(&self, s: &str) {
        emit(&format!("info string {s}"));
    }

    fn print_best_move(&self, mv: Move) {
        emit(&format!("bestmove {mv}"));
    }

    fn handle_no_legal_moves(&self) {
        self.print_info_string("no legal moves");
        emit("bestmove resign");
    }

    fn handle_entering_kings_win(&self) -> bool {
        emit("bestmove win");
        true
    }
}

struct EngineState {
    pos: Position,
    key_history: Vec<u64>,
    move_overhead_ms: u64,
}

pub fn run(eval_file: Option<&Path>) -> Result<()> {
    let handler = Arc::new(UsiOutput);
    let mut searcher = Searcher::new(DEFAULT_TT_SIZE_MIB, handler);

    if let Some(path) = eval_file {
        match searcher.set_eval_file(Some(path)) {
            Ok(()) => log::info!("loaded eval file {}", path.display()),
            Err(err) => log::error!("{err:#}"),
        }
    }

    let mut state = EngineState {
        pos: Position::startpos(),
        key_history: Vec::new(),
        move_overhead_ms: DEFAULT_MOVE_OVERHEAD_MS,
    };

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let start_time = Instant::now();

        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            continue;
        };
        let args: Vec<&str> = tokens.collect();

        match command {
            "usi" => print_initial_info(),
            "isready" => {
                if searcher.is_searching() {
                    log::error!("still searching");
                } else {
                    searcher.new_game();
                    searcher.ensure_ready();
                }
                emit("readyok");
            }
            "usinewgame" => {}
            "gameover" => {}
            "ping" => emit("pong"),
            "position" => handle_position(&mut state, &searcher, &args),
            "go" => handle_go(&mut state, &mut searcher, &args, start_time),
            "stop" => {
                if searcher.is_searching() {
                    searcher.stop();
                } else {
                    log::error!("not searching");
                }
            }
            "setoption" => handle_setoption(&mut state, &mut searcher, &args),
            "d" => print!("{}", state.pos),
            "quit" => break,
            _ => log::warn!("unknown command '{command}'"),
        }
    }

    Ok(())
}

fn print_initial_info() {
    emit(&format!("id name {} {}", NAME, env!("CARGO_PKG_VERSION")));
    emit(&format!("id author {AUTHOR}"));

    emit(&format!(
        "option name USI_Hash type spin default {} min {} max {}",
        DEFAULT_TT_SIZE_MIB, TT_SIZE_RANGE.0, TT_SIZE_RANGE.1
    ));
    emit(&format!(
        "option name Threads type spin default {} min {} max {}",
        DEFAULT_THREAD_COUNT, THREAD_COUNT_RANGE.0, THREAD_COUNT_RANGE.1
    ));
    emit(&format!(
        "option name MultiPV type spin default {} min {} max {}",
        DEFAULT_MULTI_PV, MULTI_PV_RANGE.0, MULTI_PV_RANGE.1
    ));
    emit(&format!(
        "option name MoveOverhead type spin default {} min {} max {}",
        DEFAULT_MOVE_OVERHEAD_MS, MOVE_OVERHEAD_RANGE.0, MOVE_OVERHEAD_RANGE.1
    ));
    emit("option name CuteChessWorkaround type check default false");
    emit("option name EvalFile type string default <empty>");

    emit("usiok");
}

fn handle_position(state: &mut EngineState, searcher: &Searcher, args: &[&str]) {
    if searcher.is_searching() {
        log::error!("still searching");
        return;
    }
    if args.is_empty() {
        return;
    }

    let moves_at = args.iter().position(|&a| a == "moves").unwrap_or(args.len());

    if args[0] == "startpos" {
        state.pos = Position::startpos();
        state.key_history.clear();
    } else if args[0] == "sfen" {
        let sfen = args[1..moves_at].join(" ");
        match Position::from_sfen(&sfen) {
            Ok(pos) => {
                state.pos = pos;
                state.key_history.clear();
            }
            Err(err) => {
                log::error!("failed to parse sfen: {err}");
                return;
            }
        }
    } else {
        return;
    }

    for text in &args[moves_at..] {
        if *text == "moves" {
            continue;
        }
        let Some(mv) = Move::parse(text) else {
            log::error!("invalid move '{text}'");
            break;
        };
        if !state.pos.is_pseudolegal(mv) || !state.pos.is_legal(mv) {
            log::error!("illegal move '{text}'");
            break;
        }
        state.key_history.push(state.pos.key());
        state.pos = state.pos.apply_move(mv);
    }
}

fn handle_go(
    state: &mut EngineState,
    searcher: &mut Searcher,
    args: &[&str],
    start_time: Instant,
) {
    if searcher.is_searching() {
        log::error!("still searching");
        return;
    }

    let mut limiters = Vec::new();

    let mut infinite = false;
    let mut max_depth = MAX_DEPTH;

    let mut btime: Option<f64> = None;
    let mut wtime: Option<f64> = None;
    let mut binc: Option<f64> = None;
    let mut winc: Option<f64> = None;
    let mut byoyomi: Option<f64> = None;

    let mut iter = args.iter();
    while let Some(&token) = iter.next() {
        // most tokens take one numeric argument
        let mut next_number = |what: &str| -> Option<i64> {
            match iter.next() {
                Some(value) => match value.parse::<i64>() {
                    Ok(parsed) => Some(parsed),
                    Err(_) => {
                        log::error!("invalid {what} '{value}'");
                        None
                    }
                },
                None => {
                    log::error!("missing {what}");
                    None
                }
            }
        };

        match token {
            "infinite" => infinite = true,
            "depth" => match next_number("depth") {
                Some(depth) => max_depth = (depth as i32).clamp(1, MAX_DEPTH),
                None => return,
            },
            "nodes" => match next_number("node limit") {
                Some(nodes) => limiters.push(Limiter::Nodes {
                    max_nodes: nodes.max(0) as u64,
                }),
                None => return,
            },
            "movetime" => match next_number("move time limit") {
                Some(ms) => limiters.push(Limiter::MoveTime {
                    start: start_time,
                    max_time: ms.max(1) as f64 / 1000.0,
                }),
                None => return,
            },
            "btime" => match next_number("btime limit") {
                Some(ms) => btime = Some(ms.max(1) as f64 / 1000.0),
                None => return,
            },
            "wtime" => match next_number("wtime limit") {
                Some(ms) => wtime = Some(ms.max(1) as f64 / 1000.0),
                None => return,
            },
            "binc" => match next_number("binc limit") {
                Some(ms) => binc = Some(ms.max(0) as f64 / 1000.0),
                None => return,
            },
            "winc" => match next_number("winc limit") {
                Some(ms) => winc = Some(ms.max(0) as f64 / 1000.0),
                None => return,
            },
            "byoyomi" => match next_number("byoyomi") {
                Some(ms) => byoyomi = Some(ms.max(0) as f64 / 1000.0),
                None => return,
            },
            "mate" => {
                emit("info string go mate not supported");
                emit("checkmate notimplemented");
                return;
            }
            _ => {}
        }
    }

    let (time, inc) = match state.pos.stm() {
        Color::Black => (btime, binc),
        Color::White => (wtime, winc),
    };

    if let Some(remaining) = time {
        let limits = TimeLimits {
            remaining,
            increment: inc.unwrap_or(0.0),
            byoyomi: byoyomi.unwrap_or(0.0),
        };
        limiters.push(Limiter::TimeManager(TimeManager::new(
            start_time,
            limits,
            state.move_overhead_ms as f64 / 1000.0,
        )));
    } else if inc.is_some() {
        emit("info string Warning: increment given but no time, ignoring");
    }

    searcher.start_search(
        &state.pos,
        &state.key_history,
        start_time,
        infinite,
        max_depth,
        Some(Limiter::Compound(limiters)),
    );
}

fn handle_setoption(state: &mut EngineState, searcher: &mut Searcher, args: &[&str]) {
    if searcher.is_searching() {
        log::error!("still searching");
        return;
    }

    if args.len() < 2 || args[0] != "name" {
        return;
    }

    let value_at = args.iter().position(|&a| a == "value").unwrap_or(args.len());
    if value_at == 1 {
        log::error!("missing option name");
        return;
    }
    if value_at > 2 {
        log::warn!("spaces in option names not supported");
        return;
    }

    let mut name = args[1].to_ascii_lowercase();
    if let Some(stripped) = name.strip_prefix("usi_") {
        name = stripped.to_string();
    }

    if value_at + 1 >= args.len() {
        log::error!("missing value");
        return;
    }
    let value = args[value_at + 1..].join(" ");

    match name.as_str() {
        "hash" => match value.parse::<usize>() {
            Ok(mib) => searcher.set_tt_size(mib.clamp(TT_SIZE_RANGE.0, TT_SIZE_RANGE.1)),
            Err(_) => log::error!("invalid hash size '{value}'"),
        },
        "threads" => match value.parse::<u32>() {
            Ok(threads) => {
                searcher.set_thread_count(threads.clamp(THREAD_COUNT_RANGE.0, THREAD_COUNT_RANGE.1))
            }
            Err(_) => log::error!("invalid thread count '{value}'"),
        },
        "multipv" => match value.parse::<u32>() {
            Ok(multi_pv) => {
                searcher.set_multi_pv(multi_pv.clamp(MULTI_PV_RANGE.0, MULTI_PV_RANGE.1))
            }
            Err(_) => log::error!("invalid multipv '{value}'"),
        },
        "moveoverhead" => match value.parse::<u64>() {
            Ok(ms) => {
                state.move_overhead_ms = ms.clamp(MOVE_OVERHEAD_RANGE.0, MOVE_OVERHEAD_RANGE.1)
            }
            Err(_) => log::error!("invalid move overhead '{value}'"),
        },
        "cutechessworkaround" => match value.parse::<bool>() {
            Ok(enabled) => searcher.set_cute_chess_workaround(enabled),
            Err(_) => log::error!("invalid value '{value}'"),
        },
        "evalfile" => {
            let result = if value.is_empty() || value == "<empty>" {
                searcher.set_eval_file(None)
            } else {
                searcher.set_eval_file(Some(Path::new(&value)))
            };
            if let Err(err) = result {
                log::error!("{err:#}");
            }
        }
        other => log::warn!("unknown option '{other}'"),
    }
}
