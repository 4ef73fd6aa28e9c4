//! Derived fields for securities snapshots and case change events.

use serde_json::{json, Map, Value};

use super::state::{PricePoint, ScrapeState};

fn diff(current: Option<f64>, prev: Option<f64>) -> Option<f64> {
    Some(current? - prev?)
}

/// Percent change; none when there is no previous value or it is zero.
fn pct_change(current: Option<f64>, prev: Option<f64>) -> Option<f64> {
    let prev = prev.filter(|p| *p != 0.0)?;
    Some((current? - prev) / prev * 100.0)
}

/// Copy each security with `mid` and change fields against the previous
/// poll and the first price seen. Updates `state`'s price memory.
pub fn enrich_securities(securities: &[Value], state: &mut ScrapeState) -> Vec<Value> {
    let mut enriched = Vec::with_capacity(securities.len());

    for sec in securities {
        let Some(fields) = sec.as_object() else {
            enriched.push(sec.clone());
            continue;
        };
        let ticker = fields.get("ticker").and_then(Value::as_str).filter(|t| !t.is_empty());
        let num = |key: &str| fields.get(key).and_then(Value::as_f64);
        let last = num("last");
        let mid = match (num("bid"), num("ask")) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        };

        let prev = ticker
            .and_then(|t| state.last_prices.get(t).copied())
            .unwrap_or_default();

        let first = match ticker {
            Some(t) => {
                if let Some(price) = last {
                    state.first_prices.entry(t.to_string()).or_insert(price);
                }
                state.last_prices.insert(t.to_string(), PricePoint { last, mid });
                state.first_prices.get(t).copied()
            }
            None => None,
        };

        let mut out: Map<String, Value> = fields.clone();
        out.insert("mid".into(), json!(mid));
        out.insert("delta_last".into(), json!(diff(last, prev.last)));
        out.insert("pct_last".into(), json!(pct_change(last, prev.last)));
        out.insert("delta_mid".into(), json!(diff(mid, prev.mid)));
        out.insert("pct_mid".into(), json!(pct_change(mid, prev.mid)));
        out.insert("delta_from_start".into(), json!(diff(last, first)));
        out.insert("pct_from_start".into(), json!(pct_change(last, first)));
        enriched.push(Value::Object(out));
    }
    enriched
}

fn field<'a>(case: &'a Value, key: &str) -> &'a Value {
    case.get(key).unwrap_or(&Value::Null)
}

/// Events between the stored case and `case`, oldest-first:
/// `case_start` on the first reading, then `case_change`, `status_change`,
/// `period_change` and `tick_change` as they apply.
pub fn detect_case_events(state: &mut ScrapeState, case: &Value, now_ts: f64, now_str: &str) -> Vec<Value> {
    let Some(prev) = state.last_case.take() else {
        state.last_tick_ts = Some(now_ts);
        state.last_period_ts = Some(now_ts);
        state.last_case = Some(case.clone());
        return vec![json!({ "ts": now_str, "event": "case_start", "case": case })];
    };

    let mut events = Vec::new();
    let change = |event: &str, key: &str| {
        json!({
            "ts": now_str,
            "event": event,
            "prev": field(&prev, key),
            "current": field(case, key),
        })
    };

    if field(case, "name") != field(&prev, "name") {
        events.push(change("case_change", "name"));
    }
    if field(case, "status") != field(&prev, "status") {
        events.push(change("status_change", "status"));
    }
    if field(case, "period") != field(&prev, "period") {
        let since = state.last_period_ts.map(|t| now_ts - t);
        state.last_period_ts = Some(now_ts);
        let mut event = change("period_change", "period");
        event["seconds_since_last_period"] = json!(since);
        events.push(event);
    }
    if field(case, "tick") != field(&prev, "tick") {
        let since = state.last_tick_ts.map(|t| now_ts - t);
        state.last_tick_ts = Some(now_ts);
        let mut event = change("tick_change", "tick");
        event["seconds_since_last_tick"] = json!(since);
        events.push(event);
    }

    state.last_case = Some(case.clone());
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pct_needs_nonzero_previous() {
        assert_eq!(pct_change(Some(11.0), Some(10.0)), Some(10.0));
        assert_eq!(pct_change(Some(11.0), Some(0.0)), None);
        assert_eq!(pct_change(Some(11.0), None), None);
        assert_eq!(diff(None, Some(1.0)), None);
    }

    #[test]
    fn enrich_tracks_previous_and_first_prices() {
        let mut state = ScrapeState::default();

        let first = enrich_securities(
            &[json!({"ticker": "CRZY", "last": 10.0, "bid": 9.9, "ask": 10.1, "position": 0})],
            &mut state,
        );
        let row = &first[0];
        assert_eq!(row["position"], 0);
        assert!((row["mid"].as_f64().unwrap() - 10.0).abs() < 1e-9);
        assert!(row["delta_last"].is_null());
        assert_eq!(row["delta_from_start"], 0.0);
        assert_eq!(state.first_prices["CRZY"], 10.0);

        let second = enrich_securities(&[json!({"ticker": "CRZY", "last": 10.5, "bid": 10.4})], &mut state);
        let row = &second[0];
        assert!(row["mid"].is_null());
        assert_eq!(row["delta_last"], 0.5);
        assert_eq!(row["pct_last"], 5.0);
        assert!(row["delta_mid"].is_null());
        assert_eq!(row["pct_from_start"], 5.0);
        assert_eq!(state.last_prices["CRZY"], PricePoint { last: Some(10.5), mid: None });
        assert_eq!(state.first_prices["CRZY"], 10.0);
    }

    #[test]
    fn enrich_without_ticker_keeps_no_memory() {
        let mut state = ScrapeState::default();
        let out = enrich_securities(&[json!({"last": 1.0}), json!("odd")], &mut state);
        assert_eq!(out.len(), 2);
        assert!(out[0]["delta_from_start"].is_null());
        assert_eq!(out[1], json!("odd"));
        assert!(state.last_prices.is_empty());
    }

    #[test]
    fn case_events_sequence() {
        let mut state = ScrapeState::default();
        let c1 = json!({"name": "Demo", "status": "ACTIVE", "period": 1, "tick": 1});

        let events = detect_case_events(&mut state, &c1, 100.0, "t0");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "case_start");
        assert_eq!(events[0]["case"]["name"], "Demo");

        assert!(detect_case_events(&mut state, &c1, 100.5, "t1").is_empty());

        let c2 = json!({"name": "Demo", "status": "ACTIVE", "period": 1, "tick": 2});
        let events = detect_case_events(&mut state, &c2, 101.0, "t2");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "tick_change");
        assert_eq!(events[0]["prev"], 1);
        assert_eq!(events[0]["seconds_since_last_tick"], 1.0);

        let c3 = json!({"name": "Other", "status": "STOPPED", "period": 2, "tick": 0});
        let events = detect_case_events(&mut state, &c3, 104.0, "t3");
        let names: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["case_change", "status_change", "period_change", "tick_change"]);
        assert_eq!(events[2]["seconds_since_last_period"], 4.0);
        assert_eq!(events[3]["seconds_since_last_tick"], 3.0);
        assert_eq!(state.last_case.as_ref().unwrap()["name"], "Other");
    }
}
