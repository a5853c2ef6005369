use ghostscan::targets::parse_targets;
use ghostscan::types::Target;

#[test]
fn cidr_expands_to_hosts() {
    let targets = parse_targets("10.0.0.0/29").unwrap();
    assert_eq!(targets.len(), 6);
    assert_eq!(targets.first(), Some(&Target::from("10.0.0.1")));
    assert_eq!(targets.last(), Some(&Target::from("10.0.0.6")));
}

#[test]
fn host_names_pass_through() {
    let targets = parse_targets("scanme.example, 192.0.2.7").unwrap();
    assert_eq!(targets, vec![Target::from("scanme.example"), Target::from("192.0.2.7")]);
}

#[test]
fn blank_list_is_empty() {
    assert!(parse_targets(" , \n").unwrap().is_empty());
}

#[test]
fn oversized_range_rejected() {
    assert!(parse_targets("10.0.0.0/8").is_err());
}
