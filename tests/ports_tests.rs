use port_scan_exporter::ports::parse_port_list;

#[test]
fn parse_mixed_list_with_comments() {
    let input = r#"
        # well known
        22, 80  # ssh, http
        443
        4000-4002
        4001  # duplicate
    "#;

    let ports = parse_port_list(input).expect("parse ok");
    assert_eq!(ports, vec![22, 80, 443, 4000, 4001, 4002]);
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_port_list("0").is_err());
    assert!(parse_port_list("80,http").is_err());
}
