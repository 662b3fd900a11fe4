// Derived link and line attributes consumed by the assignments.  Every function transforms a
// network snapshot in place; publishing it back to the engine is up to the caller.
use std::collections::BTreeSet;
use std::collections::HashMap;

use itertools::Itertools;

use super::AssignmentError;
use super::HeadwaySdParams;
use super::Network;

/// Link volume attributes of the freight classes folded into background traffic.
pub static TRUCK_VOLUME: &str = "@truck";
pub static TRAILER_TRUCK_VOLUME: &str = "@trailer_truck";
pub static VAN_VOLUME: &str = "@van";

// lines with a headway at or above this (minutes) do not load the links
static MAX_BACKGROUND_HEADWAY: f64 = 900.;


/// Road charges and driving costs in eur for every link.
pub fn calc_road_cost(network: &mut Network, dist_unit_cost: f64) {
    for (_, _, link) in network.links_mut() {
        let toll_cost = link.length_km * link.toll_rate;
        link.toll_cost = toll_cost;
        link.total_cost = toll_cost + dist_unit_cost * link.length_km;
    }
}

/// Transit vehicles per hour on each link, counted as background traffic on links without a
/// bus lane (volume-delay functions 1-5).  With include_freight, the truck and trailer truck
/// volumes of the latest car assignment are added on every link.
pub fn calc_background_traffic(network: &mut Network, include_freight: bool) {
    let mut frequencies: HashMap<(u32, u32), f64> = HashMap::new();
    for line in network.transit_lines() {
        if 0. < line.headway && line.headway < MAX_BACKGROUND_HEADWAY {
            for segment in &line.segments {
                *frequencies.entry((segment.i_node, segment.j_node)).or_insert(0.) +=
                    60. / line.headway;
            }
        }
    }

    for (inode, jnode, link) in network.links_mut() {
        let frequency = match frequencies.get(&(inode, jnode)) {
            Some(ff) => *ff,
            None => 0.,
        };
        link.bus_frequency = frequency;
        link.background_traffic = if 1 <= link.volume_delay_func && link.volume_delay_func <= 5 {
            frequency
        } else {
            0.
        };
        if include_freight {
            link.background_traffic += link.volume(TRUCK_VOLUME) + link.volume(TRAILER_TRUCK_VOLUME);
        }
    }
}

/// Sets each line's boarding penalty from its mode, plus extra_penalty.  Returns the modes
/// that had no penalty; their lines keep their previous value.
pub fn calc_boarding_penalties(network: &mut Network, penalties: &HashMap<char, f64>,
                               extra_penalty: f64) -> BTreeSet<char> {
    let mut missing = BTreeSet::new();
    for line in network.transit_lines_mut() {
        match penalties.get(&line.mode) {
            Some(penalty) => line.boarding_penalty = penalty + extra_penalty,
            None => {
                missing.insert(line.mode);
            }
        }
    }
    if missing.len() > 0 {
        log::warn!("No boarding penalty found for transit modes {}", missing.iter().join(", "));
    }
    return missing;
}

// Tram speeds are stored as one number with two digits per period: aht, pt, iht.
fn tram_speed(speed_code: f64, transit_time_func: u32) -> u64 {
    let code = speed_code as u64;
    match transit_time_func {
        3 => code / 10000,
        4 => (code / 100) % 100,
        _ => code % 100,
    }
}

/// Expected extra waiting time on every segment caused by headway deviation, which grows with
/// the cumulative running time and falls with the cumulative speed of the line so far.
pub fn calc_extra_wait_time(network: &mut Network, headway_sd_func: &HashMap<char, HeadwaySdParams>)
                            -> Result<(), AssignmentError> {
    let (lines, links) = network.lines_and_links_mut();
    for line in lines.iter_mut() {
        if line.headway <= 0. {
            return Err(AssignmentError::InvalidInput(
                format!("transit line {} has headway {}", line.id, line.headway)));
        }
        let mut cumulative_length = 0.;
        let mut cumulative_time = 0.;
        let mut cumulative_speed = 0.;
        let mut headway_sd = 0.;
        for segment in line.segments.iter_mut() {
            let link = match links.edge_weight(segment.i_node, segment.j_node) {
                Some(link) => link,
                None => return Err(AssignmentError::InvalidInput(
                    format!("line {} runs on missing link {}-{}", line.id, segment.i_node,
                            segment.j_node))),
            };
            cumulative_length += link.length_km;
            match segment.transit_time_func {
                // buses in mixed traffic
                1 => cumulative_time += segment.speed_factor * link.length_km + link.auto_time
                                        + segment.dwell_time,
                // buses on bus lanes
                2 => cumulative_time += segment.speed_factor * link.length_km
                                        + segment.dwell_time,
                // trams, one speed per time period
                3 | 4 | 5 => {
                    let speed = tram_speed(link.tram_speed_code, segment.transit_time_func);
                    if speed == 0 {
                        return Err(AssignmentError::InvalidInput(
                            format!("link {}-{} has no tram speed for line {}", segment.i_node,
                                    segment.j_node, line.id)));
                    }
                    cumulative_time += link.length_km / speed as f64 * 60. + segment.dwell_time;
                }
                _ => (),
            }
            if cumulative_time > 0. {
                cumulative_speed = cumulative_length / cumulative_time * 60.;
            }
            if let Some(params) = headway_sd_func.get(&line.mode) {
                headway_sd = params.asc + params.ctime * cumulative_time
                             + params.cspeed * cumulative_speed;
            }
            segment.wait_time_dev = headway_sd * headway_sd / (2.0 * line.headway);
        }
    }
    return Ok(());
}


#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use approx::assert_ulps_eq;

    use super::*;
    use super::super::test_utils::corridor_network;
    use super::super::{TransitLine, TransitSegment};

    fn add_line(network: &mut Network, id: &str, mode: char, headway: f64, func: u32) {
        let segments = vec![TransitSegment::new(1, 2, func, 1.0, 0.5),
                            TransitSegment::new(2, 3, func, 1.0, 0.5)];
        network.add_transit_line(TransitLine::new(id, mode, headway, segments)).unwrap();
    }

    #[test]
    fn test_road_cost() {
        let mut network = corridor_network();
        calc_road_cost(&mut network, 0.12);
        let link = network.link(1, 2).unwrap();
        assert_ulps_eq!(link.toll_cost, 1.0);
        assert_ulps_eq!(link.total_cost, 1.0 + 0.24);
        let link = network.link(2, 3).unwrap();
        assert_ulps_eq!(link.toll_cost, 0.);
        assert_ulps_eq!(link.total_cost, 0.12);
    }

    #[test]
    fn test_background_traffic_skips_bus_lanes_and_rare_lines() {
        let mut network = corridor_network();
        add_line(&mut network, "l10", 'b', 10., 1);
        add_line(&mut network, "l5", 'b', 5., 1);
        add_line(&mut network, "night", 'b', 999., 1);
        calc_background_traffic(&mut network, false);
        let link = network.link(1, 2).unwrap();
        assert_ulps_eq!(link.bus_frequency, 18.);
        assert_ulps_eq!(link.background_traffic, 18.);
        let bus_lane = network.link(2, 3).unwrap();
        assert_ulps_eq!(bus_lane.bus_frequency, 18.);
        assert_ulps_eq!(bus_lane.background_traffic, 0.);
    }

    #[test]
    fn test_background_traffic_with_freight() {
        let mut network = corridor_network();
        add_line(&mut network, "l10", 'b', 10., 1);
        for (_, _, link) in network.links_mut() {
            link.set_volume(TRUCK_VOLUME, 4.);
            link.set_volume(TRAILER_TRUCK_VOLUME, 2.);
            link.set_volume(VAN_VOLUME, 100.);
        }
        calc_background_traffic(&mut network, true);
        assert_ulps_eq!(network.link(1, 2).unwrap().background_traffic, 12.);
        assert_ulps_eq!(network.link(2, 3).unwrap().background_traffic, 6.);
        // recomputing without freight drops the volumes again
        calc_background_traffic(&mut network, false);
        assert_ulps_eq!(network.link(1, 2).unwrap().background_traffic, 6.);
    }

    #[test]
    fn test_boarding_penalties() {
        let mut network = corridor_network();
        add_line(&mut network, "bus", 'b', 10., 1);
        add_line(&mut network, "ferry", 'x', 10., 1);
        let mut penalties = HashMap::new();
        penalties.insert('b', 3.);
        let missing = calc_boarding_penalties(&mut network, &penalties, 5.);
        assert_eq!(missing.into_iter().collect::<Vec<char>>(), vec!['x']);
        assert_ulps_eq!(network.transit_lines()[0].boarding_penalty, 8.);
        assert_ulps_eq!(network.transit_lines()[1].boarding_penalty, 0.);
        calc_boarding_penalties(&mut network, &penalties, 0.);
        assert_ulps_eq!(network.transit_lines()[0].boarding_penalty, 3.);
    }

    #[test]
    fn test_extra_wait_time_for_buses() {
        let mut network = corridor_network();
        add_line(&mut network, "bus", 'b', 10., 1);
        let mut funcs = HashMap::new();
        funcs.insert('b', HeadwaySdParams::new(2., 0.1, -0.05));
        calc_extra_wait_time(&mut network, &funcs).unwrap();

        // first segment: time 1*2 + 3 + 0.5 = 5.5 min over 2 km
        let time1: f64 = 5.5;
        let speed1 = 2. / time1 * 60.;
        let sd1 = 2. + 0.1 * time1 - 0.05 * speed1;
        // second segment: still mixed traffic function, 1*1 + 0 + 0.5
        let time2 = time1 + 1.5;
        let speed2 = 3. / time2 * 60.;
        let sd2 = 2. + 0.1 * time2 - 0.05 * speed2;
        let segments = &network.transit_lines()[0].segments;
        assert_relative_eq!(segments[0].wait_time_dev, sd1 * sd1 / 20., epsilon = 1e-12);
        assert_relative_eq!(segments[1].wait_time_dev, sd2 * sd2 / 20., epsilon = 1e-12);
    }

    #[test]
    fn test_extra_wait_time_for_trams_uses_period_speed() {
        let mut network = corridor_network();
        add_line(&mut network, "tram_aht", 't', 6., 3);
        add_line(&mut network, "tram_iht", 't', 6., 5);
        let mut funcs = HashMap::new();
        funcs.insert('t', HeadwaySdParams::new(0., 1., 0.));
        calc_extra_wait_time(&mut network, &funcs).unwrap();
        // aht speed 15 km/h: 2 km takes 8 min, plus dwell
        let aht = network.transit_lines()[0].segments[0].wait_time_dev;
        assert_relative_eq!(aht, 8.5 * 8.5 / 12., epsilon = 1e-12);
        // iht speed 20 km/h: 2 km takes 6 min, plus dwell
        let iht = network.transit_lines()[1].segments[0].wait_time_dev;
        assert_relative_eq!(iht, 6.5 * 6.5 / 12., epsilon = 1e-12);
    }

    #[test]
    fn test_extra_wait_time_without_sd_function_is_zero() {
        let mut network = corridor_network();
        add_line(&mut network, "metro", 'm', 4., 2);
        calc_extra_wait_time(&mut network, &HashMap::new()).unwrap();
        for segment in &network.transit_lines()[0].segments {
            assert_eq!(segment.wait_time_dev, 0.);
        }
    }

    #[test]
    fn test_tram_speed_digits() {
        assert_eq!(tram_speed(151820., 3), 15);
        assert_eq!(tram_speed(151820., 4), 18);
        assert_eq!(tram_speed(151820., 5), 20);
        // a single-digit aht speed leaves only five digits
        assert_eq!(tram_speed(91820., 3), 9);
    }
}
